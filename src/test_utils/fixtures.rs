//! On-disk fixtures: scripts, archives, and release metadata.

use crate::upgrade::release::{Asset, Release};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes an executable `#!/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    {
        let mut file = File::create(&path).expect("create script");
        writeln!(file, "#!/bin/sh\n{body}").expect("write script");
        file.sync_all().expect("sync script");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }

    path
}

/// Writes a gzip-compressed tarball with `(path, contents, mode)` entries.
pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8], u32)]) {
    let file = File::create(path).expect("create tarball");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, contents, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(*mode);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, name, *contents).expect("append tar entry");
    }

    builder.into_inner().expect("finish tar").finish().expect("finish gzip");
}

/// Writes a zip archive with `(path, contents)` entries, all marked executable.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);

    for (name, contents) in entries {
        zip.start_file(*name, options).expect("start zip entry");
        zip.write_all(contents).expect("write zip entry");
    }

    zip.finish().expect("finish zip");
}

/// An asset named `name` with a placeholder URL.
pub fn asset(name: &str) -> Asset {
    Asset {
        name: name.to_string(),
        browser_download_url: format!("https://example.invalid/download/{name}"),
        size: 0,
        content_type: None,
    }
}

/// A published, non-draft release tagged `tag` with the named assets.
pub fn release_with_assets(tag: &str, asset_names: &[&str]) -> Release {
    Release {
        tag_name: tag.to_string(),
        name: Some(format!("delta {tag}")),
        body: Some(format!("Release notes for {tag}.")),
        draft: false,
        prerelease: tag.contains('-'),
        published_at: Some(chrono::Utc::now()),
        assets: asset_names.iter().map(|name| asset(name)).collect(),
    }
}
