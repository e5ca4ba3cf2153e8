//! Unix-seconds timestamp helper, isolated so the rest of the crate never
//! calls `SystemTime::now()` directly (keeps `format`/`inode_ops` testable
//! without wall-clock coupling if a fixed clock is ever substituted).

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
