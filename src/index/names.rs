//! Decomposing a metric name into `(tag, value)` pairs and back.
//!
//! A dotted path (`a.b.c`) yields synthetic positional tags (`.0=a`,
//! `.1=b`, `.2=c`, `.len=3`); a tag-bearing name (`metric;k=v`) yields a
//! `name=metric` pair plus its native `tag=value` pairs.

/// One `(tag, value)` pair derived from a metric name.
pub type TagPair = (Vec<u8>, Vec<u8>);

/// Splits `name` into its indexable tag pairs.
pub fn split_name(name: &[u8]) -> Vec<TagPair> {
    if let Some(semi) = name.iter().position(|&b| b == b';') {
        let metric = &name[..semi];
        let mut pairs = vec![(b"name".to_vec(), metric.to_vec())];
        for part in name[semi + 1..].split(|&b| b == b';') {
            if part.is_empty() {
                continue;
            }
            if let Some(eq) = part.iter().position(|&b| b == b'=') {
                pairs.push((part[..eq].to_vec(), part[eq + 1..].to_vec()));
            }
        }
        pairs
    } else {
        let segments: Vec<&[u8]> = name.split(|&b| b == b'.').collect();
        let mut pairs = Vec::with_capacity(segments.len() + 1);
        for (i, seg) in segments.iter().enumerate() {
            pairs.push((format!(".{i}").into_bytes(), seg.to_vec()));
        }
        pairs.push((b".len".to_vec(), segments.len().to_string().into_bytes()));
        pairs
    }
}

/// Reconstructs the original name from its `(tag, value)` pairs, in the
/// same shape `split_name` would have produced it.
pub fn join_name(pairs: &[TagPair]) -> Vec<u8> {
    if let Some((_, metric)) = pairs.iter().find(|(t, _)| t == b"name") {
        let mut out = metric.clone();
        let mut tags: Vec<&TagPair> = pairs.iter().filter(|(t, _)| t != b"name").collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (tag, value) in tags {
            out.push(b';');
            out.extend_from_slice(tag);
            out.push(b'=');
            out.extend_from_slice(value);
        }
        out
    } else {
        let len: usize = pairs
            .iter()
            .find(|(t, _)| t == b".len")
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let mut segments = vec![Vec::new(); len];
        for (tag, value) in pairs {
            if let Some(idx_str) = tag.strip_prefix(b".") {
                if let Ok(idx) = std::str::from_utf8(idx_str).unwrap_or("").parse::<usize>() {
                    if idx < len {
                        segments[idx] = value.clone();
                    }
                }
            }
        }
        segments.join(&b'.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_dotted_name() {
        let pairs = split_name(b"a.b.c");
        assert_eq!(
            pairs,
            vec![
                (b".0".to_vec(), b"a".to_vec()),
                (b".1".to_vec(), b"b".to_vec()),
                (b".2".to_vec(), b"c".to_vec()),
                (b".len".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn splits_tagged_name() {
        let pairs = split_name(b"requests;dc=prod;host=alpha");
        assert_eq!(
            pairs,
            vec![
                (b"name".to_vec(), b"requests".to_vec()),
                (b"dc".to_vec(), b"prod".to_vec()),
                (b"host".to_vec(), b"alpha".to_vec()),
            ]
        );
    }

    #[test]
    fn round_trips_dotted_name() {
        let pairs = split_name(b"a.b.c");
        assert_eq!(join_name(&pairs), b"a.b.c");
    }

    #[test]
    fn round_trips_tagged_name() {
        let pairs = split_name(b"requests;dc=prod;host=alpha");
        assert_eq!(join_name(&pairs), b"requests;dc=prod;host=alpha");
    }
}
