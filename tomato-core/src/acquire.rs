use crate::error::AcquireError;
use burn::config::Config;
use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write as _},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};
use zip::{result::ZipError, ZipArchive};

const FALLBACK_ARCHIVE_NAME: &str = "dataset.zip";

#[derive(Config, Debug)]
pub struct AcquireConfig {
    /// URL (http/https) or local path / `file://` URL of the zip archive
    pub source: String,
    /// Where the archive is stored while it is being extracted
    pub download_dir: PathBuf,
    pub extract_dir: PathBuf,
    /// Global timeout of the HTTP request, in seconds
    #[config(default = 300)]
    pub timeout_secs: u64,
}

/// Where the dataset archive comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Http(String),
    File(PathBuf),
}

impl From<&str> for ArchiveSource {
    fn from(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            return Self::Http(value.to_string());
        }
        match value.strip_prefix("file://") {
            Some(path) => Self::File(PathBuf::from(path)),
            None => Self::File(PathBuf::from(value)),
        }
    }
}

impl ArchiveSource {
    /// The name the archive gets inside the download directory.
    pub fn file_name(&self) -> String {
        let name = match self {
            Self::Http(url) => {
                let url = url.split(['?', '#']).next().unwrap_or_default();
                url.rsplit('/').next().unwrap_or_default().to_string()
            }
            Self::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        match name.is_empty() {
            true => FALLBACK_ARCHIVE_NAME.to_string(),
            false => name,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Http(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// Outcome of a successful [`download_and_extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    pub archive_name: String,
    /// Number of regular files written to the extract directory
    pub extracted: usize,
}

/// An archive inside the download directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub path: PathBuf,
    /// False when the source already was this file, which then belongs to
    /// the caller and must not be deleted
    pub created: bool,
}

/// Fetches archives. Holds the HTTP agent so that connections and the
/// timeout are configured once by whoever creates it.
#[derive(Debug, Clone)]
pub struct Downloader {
    agent: ureq::Agent,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Store `source` inside `dir`.
    ///
    /// Nothing is written when the server answers with a non-success status.
    pub fn fetch(&self, source: &ArchiveSource, dir: &Path) -> Result<Stored, AcquireError> {
        fs::create_dir_all(dir).map_err(AcquireError::io(dir))?;
        let dest = dir.join(source.file_name());
        let created = match source {
            ArchiveSource::Http(url) => {
                self.fetch_http(url, &dest)?;
                true
            }
            ArchiveSource::File(path) => copy_local(path, &dest)?,
        };
        info!(
            "archive {} stored at {}",
            source.describe(),
            dest.display()
        );
        Ok(Stored {
            path: dest,
            created,
        })
    }

    fn fetch_http(&self, url: &str, dest: &Path) -> Result<(), AcquireError> {
        info!("downloading {url}");
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(AcquireError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(AcquireError::Transport {
                    url: url.to_string(),
                    source: Box::new(transport),
                })
            }
        };
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(AcquireError::Status {
                url: url.to_string(),
                status,
            });
        }

        let file = File::create(dest).map_err(AcquireError::io(dest))?;
        let mut writer = BufWriter::new(file);
        let copied = io::copy(&mut response.into_reader(), &mut writer).and_then(|n| {
            writer.flush()?;
            Ok(n)
        });
        match copied {
            Ok(n) => {
                debug!("received {n} bytes from {url}");
                Ok(())
            }
            Err(source) => {
                // a truncated archive must not be mistaken for a complete one
                fs::remove_file(dest).ok();
                Err(AcquireError::Io {
                    path: dest.to_path_buf(),
                    source,
                })
            }
        }
    }
}

/// Copy `path` to `dest`; false when both already are the same file.
fn copy_local(path: &Path, dest: &Path) -> Result<bool, AcquireError> {
    let src = path.canonicalize().map_err(AcquireError::io(path))?;
    if dest.canonicalize().is_ok_and(|d| d == src) {
        return Ok(false);
    }
    fs::copy(&src, dest).map_err(AcquireError::io(path))?;
    Ok(true)
}

/// Unpack every file entry of the zip at `archive` below `outdir`.
///
/// Entries whose names would escape `outdir` are skipped.
pub fn extract(archive: &Path, outdir: &Path) -> Result<usize, AcquireError> {
    let archive_err = |source: ZipError| AcquireError::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(AcquireError::io(archive))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;
    fs::create_dir_all(outdir).map_err(AcquireError::io(outdir))?;

    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(archive_err)?;
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            warn!("skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let outpath = outdir.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(AcquireError::io(&outpath))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(AcquireError::io(parent))?;
        }
        let mut outfile = File::create(&outpath).map_err(AcquireError::io(&outpath))?;
        io::copy(&mut entry, &mut outfile).map_err(AcquireError::io(&outpath))?;
        debug!(
            "extracted {} ({} bytes)",
            outpath.display(),
            entry.size()
        );
        extracted += 1;
    }
    Ok(extracted)
}

/// Download the archive named by `config.source`, unpack it into
/// `config.extract_dir` and delete the downloaded archive.
///
/// A failed fetch returns before anything is extracted. A local source that
/// already lives in the download directory is extracted but kept.
pub fn download_and_extract(config: &AcquireConfig) -> Result<Acquired, AcquireError> {
    let source = ArchiveSource::from(config.source.as_str());
    let downloader = Downloader::new(Duration::from_secs(config.timeout_secs));
    let Stored {
        path: archive,
        created,
    } = downloader.fetch(&source, &config.download_dir)?;

    info!(
        "extracting {} into {}",
        archive.display(),
        config.extract_dir.display()
    );
    let extracted = extract(&archive, &config.extract_dir)?;
    if created {
        fs::remove_file(&archive).map_err(AcquireError::io(&archive))?;
        info!("{extracted} files extracted, {} removed", archive.display());
    } else {
        info!("{extracted} files extracted, source {} kept", archive.display());
    }

    Ok(Acquired {
        archive_name: source.file_name(),
        extracted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        organize::{organize, LabelMap},
        testing::{scratch_dir, write_zip},
    };
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
        thread,
    };

    /// Serve exactly one HTTP request on a loopback port.
    fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{addr}/datasets/tomatoes.zip")
    }

    #[test]
    fn test_archive_file_name() {
        let url = ArchiveSource::from("https://github.com/x/y/raw/main/data/tomatoes.zip?raw=true");
        assert_eq!(url.file_name(), "tomatoes.zip");
        let bare = ArchiveSource::from("https://example.com/");
        assert_eq!(bare.file_name(), FALLBACK_ARCHIVE_NAME);
        let local = ArchiveSource::from("file:///data/archive.zip");
        assert_eq!(local, ArchiveSource::File(PathBuf::from("/data/archive.zip")));
        assert_eq!(local.file_name(), "archive.zip");
    }

    #[test]
    fn test_error_status_skips_extraction() {
        let dir = scratch_dir("acquire_status");
        let url = serve_once("404 Not Found", vec![]);
        let config = AcquireConfig::new(url, dir.join("downloads"), dir.join("dataset"));

        let err = download_and_extract(&config).unwrap_err();
        assert!(matches!(err, AcquireError::Status { status: 404, .. }), "{err}");
        assert!(!dir.join("dataset").exists());
        assert_eq!(fs::read_dir(dir.join("downloads")).unwrap().count(), 0);
    }

    #[test]
    fn test_http_download_extracts_and_removes_archive() {
        let dir = scratch_dir("acquire_http");
        let archive = dir.join("served.zip");
        write_zip(
            &archive,
            &[("content/Ripe/a.jpg", "a"), ("content/Old/b.jpg", "b")],
        );
        let url = serve_once("200 OK", fs::read(&archive).unwrap());
        let config = AcquireConfig::new(url, dir.join("downloads"), dir.join("dataset"));

        let acquired = download_and_extract(&config).unwrap();
        assert_eq!(acquired.archive_name, "tomatoes.zip");
        assert_eq!(acquired.extracted, 2);
        assert!(!dir.join("downloads/tomatoes.zip").exists());
        assert_eq!(
            fs::read_to_string(dir.join("dataset/content/Ripe/a.jpg")).unwrap(),
            "a"
        );

        let report = organize(dir.join("dataset"), &LabelMap::TOMATO).unwrap();
        assert_eq!(report.total(), 2);
        let mut dirs = fs::read_dir(dir.join("dataset"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        dirs.sort();
        assert_eq!(dirs, ["Danificados", "Maduros", "Velhos", "Verdes"]);
    }

    #[test]
    fn test_local_source_keeps_original() {
        let dir = scratch_dir("acquire_local");
        let archive = dir.join("tomatoes.zip");
        write_zip(&archive, &[("Unripe/c.png", "c")]);
        let config = AcquireConfig::new(
            format!("file://{}", archive.display()),
            dir.join("downloads"),
            dir.join("dataset"),
        );

        let acquired = download_and_extract(&config).unwrap();
        assert_eq!(acquired.extracted, 1);
        assert!(archive.exists());
        assert!(!dir.join("downloads/tomatoes.zip").exists());
        assert!(dir.join("dataset/Unripe/c.png").is_file());
    }

    #[test]
    fn test_source_inside_download_dir_is_kept() {
        let dir = scratch_dir("acquire_in_place");
        let archive = dir.join("downloads/tomatoes.zip");
        fs::create_dir_all(dir.join("downloads")).unwrap();
        write_zip(&archive, &[("Old/d.jpg", "d")]);
        let config = AcquireConfig::new(
            archive.display().to_string(),
            dir.join("downloads"),
            dir.join("dataset"),
        );

        let acquired = download_and_extract(&config).unwrap();
        assert_eq!(acquired.extracted, 1);
        assert!(archive.is_file());
        assert!(dir.join("dataset/Old/d.jpg").is_file());
    }

    #[test]
    fn test_unreachable_server_is_transport_error() {
        let dir = scratch_dir("acquire_refused");
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let source = ArchiveSource::from(format!("http://{addr}/tomatoes.zip").as_str());

        let err = Downloader::new(Duration::from_secs(5))
            .fetch(&source, &dir)
            .unwrap_err();
        assert!(matches!(err, AcquireError::Transport { .. }), "{err}");
        assert!(!dir.join("tomatoes.zip").exists());
    }

    #[test]
    fn test_unsafe_entries_are_skipped() {
        let dir = scratch_dir("acquire_unsafe");
        let archive = dir.join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x"), ("Ripe/a.jpg", "a")]);

        assert_eq!(extract(&archive, &dir.join("out")).unwrap(), 1);
        assert!(!dir.join("escape.txt").exists());
        assert!(dir.join("out/Ripe/a.jpg").is_file());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = scratch_dir("acquire_config");
        let config = AcquireConfig::new("https://example.com/t.zip".into(), "d".into(), "e".into())
            .with_timeout_secs(10);
        config.save(dir.join("acquire.json")).unwrap();
        let loaded = AcquireConfig::load(dir.join("acquire.json")).unwrap();
        assert_eq!(loaded.source, config.source);
        assert_eq!(loaded.extract_dir, PathBuf::from("e"));
        assert_eq!(loaded.timeout_secs, 10);
    }

    #[test]
    fn test_corrupt_archive_is_reported() {
        let dir = scratch_dir("acquire_corrupt");
        let archive = dir.join("broken.zip");
        fs::write(&archive, b"definitely not a zip file").unwrap();
        let config = AcquireConfig::new(
            archive.display().to_string(),
            dir.join("downloads"),
            dir.join("dataset"),
        );

        let err = download_and_extract(&config).unwrap_err();
        assert!(matches!(err, AcquireError::Archive { .. }), "{err}");
        assert!(dir.join("downloads/broken.zip").exists());
    }

    #[test]
    fn test_missing_local_source() {
        let dir = scratch_dir("acquire_missing");
        let config = AcquireConfig::new(
            dir.join("nowhere.zip").display().to_string(),
            dir.join("downloads"),
            dir.join("dataset"),
        );
        let err = download_and_extract(&config).unwrap_err();
        assert!(matches!(err, AcquireError::Io { .. }), "{err}");
    }
}
