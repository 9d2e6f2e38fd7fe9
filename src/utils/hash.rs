use sha2::{Digest, Sha256};
use std::io::{self, Read};

pub fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Folds `reader` into one SHA-256 state, `window_size` bytes at a time.
///
/// `on_window(completed, total)` fires after every window; `total` is derived
/// from `expected_len`. The digest does not depend on `window_size`.
pub fn digest_windows<R: Read>(
    mut reader: R,
    expected_len: u64,
    window_size: usize,
    mut on_window: impl FnMut(u64, u64),
) -> io::Result<String> {
    let window_size = window_size.max(1);
    let total_windows = expected_len.div_ceil(window_size as u64).max(1);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; window_size];
    let mut completed = 0u64;

    loop {
        let filled = fill_window(&mut reader, &mut buffer)?;
        if filled == 0 {
            break;
        }
        hasher.update(&buffer[..filled]);
        completed += 1;
        on_window(completed.min(total_windows), total_windows);
        if filled < window_size {
            break;
        }
    }

    if completed == 0 {
        on_window(total_windows, total_windows);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn percent(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

pub(crate) fn fill_window<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
