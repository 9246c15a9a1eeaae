/// Fetching LiDAR tiles and archives over HTTP.
use crate::error::{PipelineError, Result};
use crate::layout::ProjectLayout;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// File name of a download: last path segment with query and fragment removed.
pub fn file_name_from_url(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || !path.contains('/') {
        return Err(PipelineError::Download {
            url: url.to_string(),
            reason: "URL has no file name".to_string(),
        });
    }
    Ok(name.to_string())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Point-cloud files go to their input folders, anything else to the area root.
fn destination_dir(layout: &ProjectLayout, name: &Path) -> PathBuf {
    match extension_of(name).as_deref() {
        Some("laz") => layout.laz_dir(),
        Some("las") => layout.las_dir(),
        _ => layout.root.clone(),
    }
}

pub fn http_client() -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(600))
        .user_agent(concat!("point-cloud-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Stream `url` into `dest`, returning the number of bytes written.
pub fn download_file(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<u64> {
    let mut response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::Download {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
        });
    }

    let pb = match response.content_length() {
        Some(len) => ProgressBar::new(len),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("▉▊▋▌▍▎▏ "),
    );

    let file = BufWriter::new(File::create(dest)?);
    let mut writer = pb.wrap_write(file);
    let written = std::io::copy(&mut response, &mut writer)?;
    writer.flush()?;
    drop(writer);
    pb.finish_with_message("downloaded");

    if written == 0 {
        fs::remove_file(dest)?;
        return Err(PipelineError::Download {
            url: url.to_string(),
            reason: "empty response body".to_string(),
        });
    }
    Ok(written)
}

/// True for `.zip` files and anything starting with the local file header magic.
pub fn is_zip(path: &Path) -> Result<bool> {
    if extension_of(path).as_deref() == Some("zip") {
        return Ok(true);
    }
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    let read = file.read(&mut magic)?;
    Ok(read == 4 && magic == ZIP_MAGIC)
}

/// Extract `.laz` and `.las` members of an archive into the area's input
/// folders. Members are flattened to their file names; entries escaping the
/// archive root are skipped.
pub fn extract_point_clouds(archive_path: &Path, layout: &ProjectLayout) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(PathBuf::from))
        else {
            tracing::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        if !matches!(extension_of(&name).as_deref(), Some("laz" | "las")) {
            tracing::debug!("Skipping archive entry {}", entry.name());
            continue;
        }

        let dir = destination_dir(layout, &name);
        fs::create_dir_all(&dir)?;
        let out_path = dir.join(&name);
        let mut out = BufWriter::new(File::create(&out_path)?);
        std::io::copy(&mut entry, &mut out)?;
        out.flush()?;
        tracing::info!("Extracted {}", out_path.display());
        extracted.push(out_path);
    }

    Ok(extracted)
}

/// Download every link for an area. Returns the point-cloud files that ended
/// up in the input folders, including ones extracted from archives.
pub fn download_archives(links: &[String], layout: &ProjectLayout, unzip: bool) -> Result<Vec<PathBuf>> {
    if links.is_empty() {
        tracing::warn!("No download links configured for {}", layout.area);
        return Ok(Vec::new());
    }

    let client = http_client()?;
    let mut files = Vec::new();
    for (idx, url) in links.iter().enumerate() {
        let name = PathBuf::from(file_name_from_url(url)?);
        let dir = destination_dir(layout, &name);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(&name);

        tracing::info!("{} \tDownloading {}", idx, url);
        let bytes = download_file(&client, url, &dest)?;
        tracing::info!("Saved {} ({} bytes)", dest.display(), bytes);

        if matches!(extension_of(&name).as_deref(), Some("laz" | "las")) {
            files.push(dest);
        } else if unzip && is_zip(&dest)? {
            files.extend(extract_point_clouds(&dest, layout)?);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;
    use zip::write::FileOptions;

    /// Serve one canned HTTP response on a local port and return its URL.
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/tile.laz", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
        });
        (url, handle)
    }

    fn local_client() -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder().no_proxy().build().unwrap()
    }

    #[test]
    fn file_names_come_from_the_last_segment() {
        assert_eq!(
            file_name_from_url("https://example.org/lidar/ID2007_118754_e.zip").unwrap(),
            "ID2007_118754_e.zip"
        );
        assert_eq!(
            file_name_from_url("https://example.org/tiles/t1.laz?token=abc#x").unwrap(),
            "t1.laz"
        );
        assert!(file_name_from_url("https://example.org/tiles/").is_err());
        assert!(file_name_from_url("nothing").is_err());
    }

    #[test]
    fn destinations_follow_extension() {
        let layout = ProjectLayout::new(Path::new("/data"), "miami");
        assert_eq!(destination_dir(&layout, Path::new("a.LAZ")), layout.laz_dir());
        assert_eq!(destination_dir(&layout, Path::new("a.las")), layout.las_dir());
        assert_eq!(destination_dir(&layout, Path::new("a.zip")), layout.root);
    }

    #[test]
    fn zip_members_are_routed_and_sanitised() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "area");
        layout.create().unwrap();

        // No extension, detected by magic bytes.
        let archive = layout.root.join("bundle");
        let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
        for (name, body) in [
            ("tiles/a.laz", b"laz".as_slice()),
            ("b.las", b"las".as_slice()),
            ("readme.txt", b"txt".as_slice()),
            ("../escape.las", b"bad".as_slice()),
        ] {
            writer.start_file(name, FileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap();

        assert!(is_zip(&archive).unwrap());
        let extracted = extract_point_clouds(&archive, &layout).unwrap();
        assert_eq!(
            extracted,
            vec![layout.laz_dir().join("a.laz"), layout.las_dir().join("b.las")]
        );
        assert_eq!(fs::read(layout.las_dir().join("b.las")).unwrap(), b"las");
        assert!(!tmp.path().join("escape.las").exists());
        assert!(!layout.root.join("escape.las").exists());
        assert!(archive.exists());
    }

    #[test]
    fn plain_files_are_not_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tile.bin");
        fs::write(&path, b"LASF").unwrap();
        assert!(!is_zip(&path).unwrap());
    }

    #[test]
    fn invalid_urls_fail_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(tmp.path(), "area");
        let links = vec!["notascheme://host/x.laz".to_string()];
        assert!(download_archives(&links, &layout, true).is_err());
        assert!(download_archives(&[], &layout, true).unwrap().is_empty());
    }

    #[test]
    fn http_errors_are_reported_without_a_file() {
        let (url, server) =
            serve_once("HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("tile.laz");

        let err = download_file(&local_client(), &url, &dest).unwrap_err();
        server.join().unwrap();
        match err {
            PipelineError::Download { reason, .. } => assert!(reason.contains("404"), "{}", reason),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dest.exists());
    }

    #[test]
    fn empty_bodies_are_rejected_and_removed() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("tile.laz");

        let err = download_file(&local_client(), &url, &dest).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, PipelineError::Download { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn successful_downloads_report_their_size() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nLASF");
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("tile.laz");

        assert_eq!(download_file(&local_client(), &url, &dest).unwrap(), 4);
        server.join().unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"LASF");
    }
}
