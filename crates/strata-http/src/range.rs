//! `Range` header parsing: `bytes=s-e`, `bytes=s-`, and `bytes=-N`.

/// Byte window `[start, end)` requested by a `Range` header, or `None` for
/// the whole file. `Err` means 416 with `Content-Range: bytes */total`.
pub fn parse_range(header: Option<&str>, total: u64) -> Result<Option<(u64, u64)>, ()> {
    let Some(raw) = header else {
        return Ok(None);
    };
    let spec = raw.trim().strip_prefix("bytes=").ok_or(())?;
    if spec.contains(',') {
        // Multi-range requests are not supported.
        return Err(());
    }

    let (start_raw, end_raw) = spec.split_once('-').ok_or(())?;
    let start_raw = start_raw.trim();
    let end_raw = end_raw.trim();

    if start_raw.is_empty() {
        // Suffix form: the last N bytes.
        let suffix: u64 = end_raw.parse().map_err(|_| ())?;
        if suffix == 0 || total == 0 {
            return Err(());
        }
        let start = total.saturating_sub(suffix);
        return Ok(Some((start, total)));
    }

    let start: u64 = start_raw.parse().map_err(|_| ())?;
    if start >= total {
        return Err(());
    }
    if end_raw.is_empty() {
        return Ok(Some((start, total)));
    }

    let end_inclusive: u64 = end_raw.parse().map_err(|_| ())?;
    if end_inclusive < start {
        return Err(());
    }
    // An end past EOF is clamped, matching common server behavior.
    Ok(Some((start, end_inclusive.saturating_add(1).min(total))))
}
