//! Memcached command obfuscation.

use crate::config::MemcachedObfuscationConfig;
use crate::normalize::compact_whitespaces;

/// Obfuscates a Memcached command by removing any stored value.
///
/// Only the first command line is kept, which drops the data block of storage commands. Returns `None` when the
/// command should be removed entirely: either `keep_command` is disabled, or no command verb can be found.
pub fn obfuscate_memcached_command(cmd: &str, config: &MemcachedObfuscationConfig) -> Option<String> {
    if !config.keep_command() {
        return None;
    }

    let first_line = cmd.split('\n').next().unwrap_or_default();
    let command = compact_whitespaces(first_line.trim_end_matches('\r').trim());
    if command.is_empty() {
        None
    } else {
        Some(command)
    }
}
