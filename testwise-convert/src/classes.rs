// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Collects class files from directories and archives.

use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use zip::ZipArchive;

const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "war", "ear", "zip"];

/// Bytes of a class file, and where they were found.
#[derive(Clone, Debug)]
pub struct ClassBytes {
    /// File path, or `archive!entry` for archive members.
    pub origin: String,
    pub data: Vec<u8>,
}

/// Collect class files under each path, recursing into directories and
/// archives, including archives nested in archives.
pub fn collect(paths: &[impl AsRef<Path>]) -> Result<Vec<ClassBytes>> {
    let mut classes = vec![];

    for path in paths {
        collect_path(path.as_ref(), &mut classes)?;
    }

    Ok(classes)
}

fn collect_path(path: &Path, classes: &mut Vec<ClassBytes>) -> Result<()> {
    if path.is_dir() {
        let mut entries = fs::read_dir(path)
            .with_context(|| format!("unable to read directory {}", path.display()))?
            .map(|entry| Ok(entry?.path()))
            .collect::<Result<Vec<_>>>()?;

        // Sorted, so classes are collected in the same order on every run.
        entries.sort();

        for entry in entries {
            collect_path(&entry, classes)?;
        }

        return Ok(());
    }

    let name = path.display().to_string();

    if is_class(&name) {
        let data = fs::read(path).with_context(|| format!("unable to read {name}"))?;
        classes.push(ClassBytes { origin: name, data });
    } else if is_archive(&name) {
        let file = fs::File::open(path).with_context(|| format!("unable to open {name}"))?;
        collect_archive(file, &name, classes)?;
    }

    Ok(())
}

fn collect_archive<R: Read + Seek>(
    reader: R,
    origin: &str,
    classes: &mut Vec<ClassBytes>,
) -> Result<()> {
    let mut archive =
        ZipArchive::new(reader).with_context(|| format!("unable to read archive {origin}"))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("unable to read {origin}"))?;

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_owned();

        if !is_class(&name) && !is_archive(&name) {
            continue;
        }

        let mut data = vec![];
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("unable to read {origin}!{name}"))?;

        let entry_origin = format!("{origin}!{name}");

        if is_class(&name) {
            classes.push(ClassBytes {
                origin: entry_origin,
                data,
            });
        } else {
            collect_archive(Cursor::new(data), &entry_origin, classes)?;
        }
    }

    Ok(())
}

fn is_class(name: &str) -> bool {
    name.ends_with(".class")
}

fn is_archive(name: &str) -> bool {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };

    ARCHIVE_EXTENSIONS
        .iter()
        .any(|known| extension.eq_ignore_ascii_case(known))
}
