use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use zimdb::convert::{classify, EntryKind};
use zimdb::zim::Archive;

pub fn show_info(path: PathBuf, scan: bool) -> Result<()> {
    let archive = Archive::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let header = archive.header();

    println!("ZIM Archive");
    println!("===========");
    println!("File:            {}", path.display());
    println!("Size:            {} MB", archive.file_len() / 1_000_000);
    println!("Version:         {}.{}", header.major_version, header.minor_version);
    println!("UUID:            {}", format_uuid(&header.uuid));
    println!("Entries:         {}", header.entry_count);
    println!("Clusters:        {}", header.cluster_count);
    println!(
        "Namespace:       {}",
        if header.uses_content_namespace() { "unified (C)" } else { "legacy (A/I/...)" }
    );
    match archive.main_page().map(|i| archive.entry_at(i)) {
        Some(Ok(entry)) => println!("Main page:       {}", entry.url),
        Some(Err(e)) => println!("Main page:       unreadable ({})", e),
        None => println!("Main page:       none"),
    }
    println!("Mimetypes:       {}", archive.mime_types().len());
    for mime in archive.mime_types() {
        println!("  {}", mime);
    }

    if scan {
        let mut kinds: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut namespaces: BTreeMap<char, u64> = BTreeMap::new();
        let mut unreadable = 0u64;

        for index in 0..archive.entry_count() {
            match archive.entry_at(index) {
                Ok(entry) => {
                    *namespaces.entry(entry.namespace).or_default() += 1;
                    let kind = match classify(&entry) {
                        EntryKind::Article => "article",
                        EntryKind::Image => "image",
                        EntryKind::Redirect => "redirect",
                        EntryKind::Ignorable => "ignorable",
                    };
                    *kinds.entry(kind).or_default() += 1;
                }
                Err(_) => unreadable += 1,
            }
        }

        println!("\nEntry kinds");
        println!("===========");
        for (kind, count) in &kinds {
            println!("  {:<12} {}", kind, count);
        }
        if unreadable > 0 {
            println!("  {:<12} {}", "unreadable", unreadable);
        }
        println!("\nNamespaces");
        println!("==========");
        for (namespace, count) in &namespaces {
            println!("  {:<12} {}", namespace, count);
        }
    }

    Ok(())
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    uuid.iter().map(|b| format!("{:02x}", b)).collect()
}
