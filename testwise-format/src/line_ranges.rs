// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Covered lines as compact range strings, e.g. `1-5,8,11-13`.

use anyhow::{bail, Context, Result};
use probe_coverage::CompactLines;
use serde::{Deserialize, Deserializer, Serializer};

pub fn format(lines: &CompactLines) -> String {
    let mut text = String::new();

    for (first, last) in lines.ranges() {
        if !text.is_empty() {
            text.push(',');
        }

        if first == last {
            text.push_str(&first.to_string());
        } else {
            text.push_str(&format!("{first}-{last}"));
        }
    }

    text
}

pub fn parse(text: &str) -> Result<CompactLines> {
    let mut lines = CompactLines::new();

    for part in text.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }

        let (first, last) = match part.split_once('-') {
            Some((first, last)) => (parse_line(first)?, parse_line(last)?),
            None => {
                let line = parse_line(part)?;
                (line, line)
            }
        };

        if first > last {
            bail!("invalid line range: {part}");
        }

        lines.insert_range(first, last);
    }

    Ok(lines)
}

/// Class files store line numbers as `u16`, which bounds the set's size.
fn parse_line(text: &str) -> Result<u32> {
    let line: u16 = text
        .trim()
        .parse()
        .with_context(|| format!("invalid line number: {text:?}"))?;

    Ok(line.into())
}

pub fn serialize<S>(val: &CompactLines, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(val))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<CompactLines, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lines(data: &[u32]) -> CompactLines {
        data.iter().copied().collect()
    }

    #[test]
    fn test_format() {
        assert_eq!(format(&lines(&[])), "");
        assert_eq!(format(&lines(&[7])), "7");
        assert_eq!(format(&lines(&[1, 2, 3, 4, 5, 8, 11, 12, 13])), "1-5,8,11-13");
        assert_eq!(format(&lines(&[3, 4])), "3-4");
    }

    #[test]
    fn test_parse() -> Result<()> {
        assert_eq!(parse("")?, lines(&[]));
        assert_eq!(parse("1-5,8,11-13")?, lines(&[1, 2, 3, 4, 5, 8, 11, 12, 13]));

        // Unordered and overlapping input is accepted.
        assert_eq!(parse("9, 2-3,3-4")?, lines(&[2, 3, 4, 9]));

        Ok(())
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("a").is_err());
        assert!(parse("5-3").is_err());
        assert!(parse("1-").is_err());
        assert!(parse("-1").is_err());
    }

    #[test]
    fn test_parse_bounds() -> Result<()> {
        assert_eq!(parse("65535")?, lines(&[65535]));
        assert!(parse("1-4294967295").is_err());
        assert!(parse("65536").is_err());

        Ok(())
    }
}
