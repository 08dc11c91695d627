//! Input fixtures: people CSV content with chosen invalid records.

use std::path::{Path, PathBuf};

/// Header of a people file.
pub const PEOPLE_HEADER: &str = "firstName;lastName;age";

const FIRST_NAMES: [&str; 8] = [
    "john", "jane", "ada", "alan", "grace", "linus", "barbara", "ken",
];
const LAST_NAMES: [&str; 8] = [
    "doe", "roe", "lovelace", "turing", "hopper", "torvalds", "liskov", "thompson",
];

/// Generates people records (no header).
///
/// Records at the 0-based positions listed in `invalid` get a non-positive
/// age, which the people transform rejects.
#[must_use]
pub fn people_lines(count: usize, invalid: &[usize]) -> Vec<String> {
    (0..count)
        .map(|i| {
            let first = FIRST_NAMES[i % FIRST_NAMES.len()];
            let last = LAST_NAMES[(i / FIRST_NAMES.len() + i) % LAST_NAMES.len()];
            let age: i64 = if invalid.contains(&i) {
                -(i as i64)
            } else {
                18 + (i as i64 % 60)
            };
            format!("{first};{last};{age}")
        })
        .collect()
}

/// Full file content with header.
#[must_use]
pub fn people_file_content(count: usize, invalid: &[usize]) -> String {
    let mut content = String::from(PEOPLE_HEADER);
    content.push('\n');
    for line in people_lines(count, invalid) {
        content.push_str(&line);
        content.push('\n');
    }
    content
}

/// Writes a people file named `name` into `dir`.
pub fn write_people_csv(
    dir: &Path,
    name: &str,
    count: usize,
    invalid: &[usize],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, people_file_content(count, invalid))?;
    Ok(path)
}

/// Writes `files` people files (`people-<n>.csv`) into `dir`.
pub fn write_people_dir(
    dir: &Path,
    files: usize,
    records: usize,
    invalid: &[usize],
) -> std::io::Result<Vec<PathBuf>> {
    (0..files)
        .map(|n| write_people_csv(dir, &format!("people-{n:02}.csv"), records, invalid))
        .collect()
}
