//! Packed Value encoding for one-to-many relational data.
//!
//! The relational store collapses joined rows with `GROUP_CONCAT`. Repeated
//! values are separated by [`OUTER_DELIMITER`]; composite tuples (image,
//! file, ...) join their positions with [`INNER_DELIMITER`] in a fixed
//! column order:
//!
//! ```text
//! 12###alt text###caption###800###600###public://a.jpg###a.jpg###1024%%%13###...
//! └────────────────────── tuple ──────────────────────────────────────┘
//! ```
//!
//! Optional positions are empty strings, never omitted, so a given field
//! kind always has the same number of positions and decoders index them
//! positionally.

/// Separator between repeated values of one field.
pub const OUTER_DELIMITER: &str = "%%%";

/// Separator between the positions of one composite tuple.
pub const INNER_DELIMITER: &str = "###";

/// Split a packed value into its repeated values.
///
/// An empty string decodes to no values at all.
pub fn split_values(packed: &str) -> Vec<&str> {
    if packed.is_empty() {
        return Vec::new();
    }
    packed.split(OUTER_DELIMITER).collect()
}

/// Split one composite tuple into its positions.
pub fn split_tuple(value: &str) -> Vec<&str> {
    value.split(INNER_DELIMITER).collect()
}

/// Join repeated values back into a packed value.
pub fn join_values<S: AsRef<str>>(values: &[S]) -> String {
    join_with(values, OUTER_DELIMITER)
}

/// Join tuple positions back into a single value.
pub fn join_tuple<S: AsRef<str>>(parts: &[S]) -> String {
    join_with(parts, INNER_DELIMITER)
}

fn join_with<S: AsRef<str>>(parts: &[S], delimiter: &str) -> String {
    let mut out = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(delimiter);
        }
        out.push_str(part.as_ref());
    }
    out
}

/// Decode a packed value into tuples of positions.
pub fn decode(packed: &str) -> Vec<Vec<&str>> {
    split_values(packed).into_iter().map(split_tuple).collect()
}

/// Encode tuples of positions into a packed value.
pub fn encode<S: AsRef<str>>(tuples: &[Vec<S>]) -> String {
    let values: Vec<String> = tuples.iter().map(|t| join_tuple(t)).collect();
    join_values(&values)
}

/// Positional access into a decoded tuple.
///
/// Missing positions and empty strings both read as absent.
pub fn tuple_field<'a>(parts: &[&'a str], index: usize) -> Option<&'a str> {
    parts
        .get(index)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}
