//! Parsing of long-format (`ls -la`) directory listings.

use serde::{Deserialize, Serialize};

/// Entry type, taken from the first character of the permission string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
    Link,
    CharacterDevice,
    BlockDevice,
    Socket,
    Fifo,
}

impl EntryKind {
    #[must_use]
    pub const fn from_mode_char(c: char) -> Self {
        match c {
            'd' => Self::Directory,
            'l' => Self::Link,
            'c' => Self::CharacterDevice,
            'b' => Self::BlockDevice,
            's' => Self::Socket,
            'p' => Self::Fifo,
            _ => Self::File,
        }
    }
}

/// Major and minor numbers of a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNumber {
    pub major: u32,
    pub minor: u32,
}

/// One parsed listing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Byte size; zero for device nodes, which report `device` instead.
    pub size: u64,
    pub permissions: String,
    /// Modification time as printed by `ls`.
    pub modified: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceNumber>,
}

/// Command that produces a listing of `path` suitable for [`parse_listing`].
#[must_use]
pub fn listing_command(path: &str) -> String {
    let path = if path.is_empty() { "." } else { path };
    let quoted = shlex::try_quote(path).map_or_else(|_| path.into(), |q| q.into_owned());
    format!("ls -la -- {quoted}")
}

/// Parse a whole listing, skipping the `total` header and malformed lines.
#[must_use]
pub fn parse_listing(output: &str) -> Vec<DirEntry> {
    output.lines().filter_map(parse_line).collect()
}

/// Next whitespace-delimited field. `None` when nothing follows it.
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    let end = trimmed.find(char::is_whitespace)?;
    *rest = &trimmed[end..];
    Some(&trimmed[..end])
}

/// Parse one `ls -la` line.
///
/// Expected layout: `perms links owner group size month day time-or-year name...`.
/// Device nodes print `major, minor` in place of the size.
#[must_use]
pub fn parse_line(line: &str) -> Option<DirEntry> {
    let mut rest = line.trim_end();
    let permissions = next_field(&mut rest)?;
    let kind = EntryKind::from_mode_char(permissions.chars().next()?);
    for _ in 0..3 {
        next_field(&mut rest)?;
    }

    let size_field = next_field(&mut rest)?;
    let device_field = match kind {
        EntryKind::CharacterDevice | EntryKind::BlockDevice => size_field.split_once(','),
        _ => None,
    };
    let (size, device) = match device_field {
        Some((major, minor)) => {
            let minor = if minor.is_empty() {
                next_field(&mut rest)?
            } else {
                minor
            };
            let device = DeviceNumber {
                major: major.parse().ok()?,
                minor: minor.parse().ok()?,
            };
            (0, Some(device))
        }
        None => (size_field.parse().ok()?, None),
    };

    let mut modified = Vec::with_capacity(3);
    for _ in 0..3 {
        modified.push(next_field(&mut rest)?);
    }
    let modified = modified.join(" ");

    // Single separator only: names may start with spaces.
    let name = rest.strip_prefix(' ').unwrap_or(rest);
    if name.is_empty() {
        return None;
    }

    let (name, link_target) = match (kind, name.split_once(" -> ")) {
        (EntryKind::Link, Some((name, target))) => (name.to_string(), Some(target.to_string())),
        _ => (name.to_string(), None),
    };

    Some(DirEntry {
        name,
        kind,
        size,
        permissions: permissions.to_string(),
        modified,
        link_target,
        device,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
total 24
drwxr-xr-x  4 ops  ops  4096 Mar  3 10:12 .
drwxr-xr-x 12 root root 4096 Jan 17  2024 ..
-rw-r--r--  1 ops  ops   220 Mar  3 10:12 .bashrc
lrwxrwxrwx  1 ops  ops    11 Mar  3 10:13 current -> releases/42
-rw-r--r--  1 ops  ops  1337 Mar  3 10:14 release notes.txt
srwxrwxrwx  1 ops  ops     0 Mar  3 10:15 agent.sock
prw-r--r--  1 ops  ops     0 Mar  3 10:15 pipe
crw-rw-rw-  1 root root 1,   3 Mar  1 09:00 null
brw-rw----  1 root disk 8,   0 Mar  1 09:00 sda
";

    #[test]
    fn test_parse_listing_kinds() {
        let entries = parse_listing(SAMPLE);
        assert_eq!(entries.len(), 9);

        let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntryKind::Directory,
                EntryKind::Directory,
                EntryKind::File,
                EntryKind::Link,
                EntryKind::File,
                EntryKind::Socket,
                EntryKind::Fifo,
                EntryKind::CharacterDevice,
                EntryKind::BlockDevice,
            ]
        );
    }

    #[test]
    fn test_device_numbers_replace_size() {
        let listing = "total 0\n\
crw-rw-rw- 1 root root 1, 3 Oct 17 00:30 null\n\
brw-rw---- 1 root disk 8, 0 Oct 17 00:30 sda\n\
-rw-r--r-- 1 a a 5 Oct 17 00:30 f\n";
        let entries = parse_listing(listing);
        let names: Vec<(&str, EntryKind)> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("null", EntryKind::CharacterDevice),
                ("sda", EntryKind::BlockDevice),
                ("f", EntryKind::File),
            ]
        );

        let null = &entries[0];
        assert_eq!(null.size, 0);
        assert_eq!(null.device, Some(DeviceNumber { major: 1, minor: 3 }));
        assert_eq!(null.modified, "Oct 17 00:30");
        assert_eq!(entries[2].device, None);
        assert_eq!(entries[2].size, 5);

        // Some ls builds print the pair without a space.
        let tty = parse_line("crw--w---- 1 root tty 136,0 Oct 17 00:30 0").unwrap();
        assert_eq!(tty.device, Some(DeviceNumber { major: 136, minor: 0 }));
        assert_eq!(tty.name, "0");

        let value = serde_json::to_value(null).unwrap();
        assert_eq!(value["device"]["major"], 1);
        assert_eq!(value["type"], "character_device");
    }

    #[test]
    fn test_symlink_target_is_split() {
        let entry = parse_line("lrwxrwxrwx 1 ops ops 11 Mar  3 10:13 current -> releases/42")
            .unwrap();
        assert_eq!(entry.name, "current");
        assert_eq!(entry.link_target.as_deref(), Some("releases/42"));
        assert_eq!(entry.size, 11);
    }

    #[test]
    fn test_name_with_spaces_and_modified() {
        let entry =
            parse_line("-rw-r--r--  1 ops  ops  1337 Mar  3 10:14 release notes.txt").unwrap();
        assert_eq!(entry.name, "release notes.txt");
        assert_eq!(entry.modified, "Mar 3 10:14");
        assert_eq!(entry.permissions, "-rw-r--r--");
        assert_eq!(entry.link_target, None);
    }

    #[test]
    fn test_arrow_in_regular_file_name_is_kept() {
        let entry = parse_line("-rw-r--r-- 1 a a 1 Mar 3 10:14 a -> b").unwrap();
        assert_eq!(entry.name, "a -> b");
        assert_eq!(entry.link_target, None);
    }

    #[test]
    fn test_short_and_garbage_lines_skipped() {
        assert!(parse_line("total 24").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("-rw-r--r-- 1 a a notanumber Mar 3 10:14 x").is_none());
    }

    #[test]
    fn test_listing_command_quotes_path() {
        assert_eq!(listing_command("/var/log"), "ls -la -- /var/log");
        assert_eq!(listing_command("my dir"), "ls -la -- 'my dir'");
        assert_eq!(listing_command(""), "ls -la -- .");
    }

    #[test]
    fn test_entry_serializes_type_key() {
        let entry = parse_line("drwxr-xr-x 2 a a 4096 Mar 3 10:14 logs").unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "directory");
        assert!(value.get("link_target").is_none());
        assert!(value.get("device").is_none());
    }
}
