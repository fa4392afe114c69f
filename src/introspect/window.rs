use std::ops::Range;

/// The trailing positions a request looks at: the last
/// `max(1, min(requested, seq_len))` of them, empty only for an empty
/// sequence.
pub fn window(requested: i64, seq_len: usize) -> Range<usize> {
    if seq_len == 0 {
        return 0..0;
    }
    let n = requested.clamp(1, seq_len as i64) as usize;
    seq_len - n..seq_len
}

/// Map a possibly negative layer index onto `0..num_layers`.
///
/// `-1` is the last layer and `-num_layers` the first. Anything outside
/// `-num_layers..num_layers` resolves to `None`.
pub fn resolve_layer(index: i64, num_layers: usize) -> Option<usize> {
    let n = num_layers as i64;
    let resolved = if index < 0 { n + index } else { index };
    (0..n).contains(&resolved).then_some(resolved as usize)
}
