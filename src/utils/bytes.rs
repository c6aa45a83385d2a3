/// Concatenates byte slices in order.
pub fn merge_bytes(parts: &[&[u8]]) -> Vec<u8> {
    let len = parts.iter().map(|part| part.len()).sum();
    let mut merged = Vec::with_capacity(len);
    for part in parts {
        merged.extend_from_slice(part);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_bytes_keeps_order() {
        let merged = merge_bytes(&[&[1, 2], &[], &[3]]);
        assert_eq!(merged, vec![1, 2, 3]);
    }
}
