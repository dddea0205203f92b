//! Release metadata and archive downloads from GitHub Releases.

use std::cell::OnceCell;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;

use crate::config::{Repository, is_sha256_hex};
use crate::installer::InstallError;
use crate::platform::Platform;

/// Remote collaborator the installer pulls binaries from.
pub trait ReleaseSource {
    /// Tag of the newest published release.
    fn latest_version(&self) -> Result<String, InstallError>;

    /// Fetch the archive built for `platform` in release `version`.
    fn download_archive(&self, platform: &Platform, version: &str)
    -> Result<Archive, InstallError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/gzip" | "application/x-gzip" | "application/x-gtar" => {
                Some(Self::TarGz)
            }
            _ => None,
        }
    }
}

/// A downloaded release archive.
#[derive(Debug, Clone)]
pub struct Archive {
    pub name: String,
    pub format: ArchiveFormat,
    pub bytes: Vec<u8>,
    /// Digest published alongside the release, when there is one.
    pub sha256: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    pub browser_download_url: String,
}

impl Asset {
    fn format(&self) -> Option<ArchiveFormat> {
        ArchiveFormat::from_name(&self.name)
            .or_else(|| ArchiveFormat::from_content_type(&self.content_type))
    }

    fn is_checksum_file(&self) -> bool {
        let name = self.name.to_lowercase();
        name.ends_with("checksums.txt") || name.ends_with(".sha256")
    }
}

/// Pick the archive asset built for `platform`. Names without an
/// extension are kept; their format comes from the download's content type.
pub fn find_matching_asset<'a>(release: &'a Release, platform: &Platform) -> Option<&'a Asset> {
    let aliases = platform.asset_arch_aliases();
    release.assets.iter().find(|asset| {
        let name = asset.name.to_lowercase();
        !asset.is_checksum_file()
            && (asset.format().is_some() || !asset.name.contains('.'))
            && name.contains(platform.asset_os())
            && aliases.iter().any(|arch| name.contains(arch))
    })
}

/// Look up `asset_name` in a `<hex>  <file>` checksum listing.
pub fn checksum_for(listing: &str, asset_name: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let digest = parts.next()?;
        let file = parts.next()?.trim_start_matches('*');
        (file == asset_name).then(|| digest.to_lowercase())
    })
}

/// First token of a `<asset>.sha256` file, which may or may not repeat
/// the file name after the digest.
pub fn sidecar_digest(contents: &str) -> Option<String> {
    contents
        .split_whitespace()
        .next()
        .map(|digest| digest.to_lowercase())
}

pub struct GithubReleases {
    client: OnceCell<Client>,
    repository: Repository,
}

impl GithubReleases {
    pub fn new(repository: Repository) -> Self {
        Self {
            client: OnceCell::new(),
            repository,
        }
    }

    // Built on first use.
    fn client(&self) -> Result<&Client, InstallError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let client = Client::builder()
            .user_agent(concat!("nitro-launcher/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|source| InstallError::Http {
                url: self.repository.api_base.clone(),
                source,
            })?;
        Ok(self.client.get_or_init(|| client))
    }

    fn release_url(&self, tag: Option<&str>) -> String {
        let base = format!(
            "{}/repos/{}/{}/releases",
            self.repository.api_base.trim_end_matches('/'),
            self.repository.owner,
            self.repository.repo
        );
        match tag {
            Some(tag) => format!("{base}/tags/{tag}"),
            None => format!("{base}/latest"),
        }
    }

    fn fetch_release(&self, tag: Option<&str>) -> Result<Release, InstallError> {
        let url = self.release_url(tag);
        debug!("fetching release metadata from {url}");
        let response = self
            .client()?
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(|source| InstallError::Http {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(InstallError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response
            .json()
            .map_err(|source| InstallError::Decode { url, source })
    }

    fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), InstallError> {
        debug!("downloading {url}");
        let response = self
            .client()?
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .map_err(|source| InstallError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(InstallError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().map_err(|source| InstallError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok((bytes.to_vec(), content_type))
    }

    /// Digest for `asset`, preferring `<asset>.sha256` over a
    /// `checksums.txt` listing. A listing that leaves the asset out is an
    /// error.
    fn published_checksum(
        &self,
        release: &Release,
        asset: &Asset,
    ) -> Result<Option<String>, InstallError> {
        let sidecar_name = format!("{}.sha256", asset.name.to_lowercase());
        let sidecar = release
            .assets
            .iter()
            .find(|a| a.name.to_lowercase() == sidecar_name);
        let listing = release
            .assets
            .iter()
            .find(|a| a.name.to_lowercase().ends_with("checksums.txt"));

        let (source, digest) = match (sidecar, listing) {
            (Some(sidecar), _) => {
                let (data, _) = self.fetch_bytes(&sidecar.browser_download_url)?;
                (sidecar, sidecar_digest(&String::from_utf8_lossy(&data)))
            }
            (None, Some(listing)) => {
                let (data, _) = self.fetch_bytes(&listing.browser_download_url)?;
                (listing, checksum_for(&String::from_utf8_lossy(&data), &asset.name))
            }
            (None, None) => return Ok(None),
        };

        match digest {
            Some(digest) if is_sha256_hex(&digest) => Ok(Some(digest)),
            _ => Err(InstallError::ChecksumUnavailable {
                checksums: source.name.clone(),
                archive: asset.name.clone(),
            }),
        }
    }
}

impl ReleaseSource for GithubReleases {
    fn latest_version(&self) -> Result<String, InstallError> {
        Ok(self.fetch_release(None)?.tag_name)
    }

    fn download_archive(
        &self,
        platform: &Platform,
        version: &str,
    ) -> Result<Archive, InstallError> {
        let release = self.fetch_release(Some(version))?;
        let asset =
            find_matching_asset(&release, platform).ok_or_else(|| InstallError::NoMatchingAsset {
                version: release.tag_name.clone(),
                platform: format!("{}-{}", platform.os, platform.arch),
            })?;

        let (bytes, content_type) = self.fetch_bytes(&asset.browser_download_url)?;
        let format = asset
            .format()
            .or_else(|| content_type.as_deref().and_then(ArchiveFormat::from_content_type))
            .ok_or_else(|| InstallError::Extract(format!("unknown archive type: {}", asset.name)))?;

        let sha256 = self.published_checksum(&release, asset)?;

        Ok(Archive {
            name: asset.name.clone(),
            format,
            bytes,
            sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ArchiveFormat, GithubReleases, Release, ReleaseSource, checksum_for, find_matching_asset,
        sidecar_digest,
    };
    use crate::archive::tests::{tar_gz_archive, zip_archive};
    use crate::config::Repository;
    use crate::installer::{InstallError, sha256_hex};
    use crate::platform::Platform;
    use serde_json::json;
    use std::collections::HashMap;

    const RELEASE_JSON: &str = r#"{
        "tag_name": "v2.0.8",
        "name": "2.0.8",
        "assets": [
            {
                "name": "checksums.txt",
                "content_type": "text/plain",
                "browser_download_url": "https://example.test/checksums.txt"
            },
            {
                "name": "nitro_darwin_x86_64.tar.gz",
                "content_type": "application/gzip",
                "browser_download_url": "https://example.test/darwin.tar.gz"
            },
            {
                "name": "nitro_linux_x86_64.tar.gz",
                "content_type": "application/gzip",
                "browser_download_url": "https://example.test/linux.tar.gz"
            },
            {
                "name": "nitro_windows_x86_64.zip",
                "content_type": "application/zip",
                "browser_download_url": "https://example.test/windows.zip"
            }
        ]
    }"#;

    fn release() -> Release {
        serde_json::from_str(RELEASE_JSON).expect("release json should parse")
    }

    const TAG_PATH: &str = "/repos/craftcms/nitro/releases/tags/v2.0.8";
    const LINUX_ASSET: &str = "nitro_linux_x86_64.tar.gz";

    struct Route {
        status: u16,
        content_type: Option<&'static str>,
        body: Vec<u8>,
    }

    impl Route {
        fn ok(body: impl Into<Vec<u8>>) -> Self {
            Self {
                status: 200,
                content_type: None,
                body: body.into(),
            }
        }
    }

    /// Start a local server answering `routes` by path (404 otherwise) and
    /// point a `GithubReleases` at it.
    fn serve(routes: impl FnOnce(&str) -> HashMap<String, Route>) -> GithubReleases {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind local server");
        let addr = server.server_addr().to_ip().expect("tcp listener");
        let base = format!("http://{addr}");
        let routes = routes(&base);

        std::thread::spawn(move || {
            for request in server.incoming_requests() {
                let response = match routes.get(request.url()) {
                    Some(route) => {
                        let mut response = tiny_http::Response::from_data(route.body.clone())
                            .with_status_code(route.status);
                        if let Some(content_type) = route.content_type {
                            let header =
                                tiny_http::Header::from_bytes("Content-Type", content_type)
                                    .expect("valid header");
                            response = response.with_header(header);
                        }
                        response
                    }
                    None => tiny_http::Response::from_data(b"not found".to_vec())
                        .with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });

        GithubReleases::new(Repository {
            api_base: base,
            ..Repository::default()
        })
    }

    fn release_body(tag: &str, base: &str, assets: &[(&str, &str)]) -> String {
        let assets: Vec<_> = assets
            .iter()
            .map(|(name, content_type)| {
                json!({
                    "name": name,
                    "content_type": content_type,
                    "browser_download_url": format!("{base}/download/{name}"),
                })
            })
            .collect();
        json!({ "tag_name": tag, "name": tag, "assets": assets }).to_string()
    }

    #[test]
    fn matches_asset_by_os_and_arch_alias() {
        let release = release();
        let asset = find_matching_asset(&release, &Platform::new("Linux")).unwrap();
        assert_eq!(asset.name, "nitro_linux_x86_64.tar.gz");

        let asset = find_matching_asset(&release, &Platform::new("windows")).unwrap();
        assert_eq!(asset.name, "nitro_windows_x86_64.zip");

        let asset = find_matching_asset(&release, &Platform::new("WINNT")).unwrap();
        assert_eq!(asset.name, "nitro_windows_x86_64.zip");
    }

    #[test]
    fn missing_platform_has_no_asset() {
        let release = release();
        let arm = Platform::from_os_name("linux", "arm64");
        assert!(find_matching_asset(&release, &arm).is_none());
    }

    #[test]
    fn reads_digest_from_checksum_listing() {
        let listing = "\
aaaa  nitro_darwin_x86_64.tar.gz
BBBB *nitro_linux_x86_64.tar.gz
";
        assert_eq!(
            checksum_for(listing, "nitro_linux_x86_64.tar.gz").as_deref(),
            Some("bbbb")
        );
        assert!(checksum_for(listing, "nitro_windows_x86_64.zip").is_none());
    }

    #[test]
    fn detects_archive_format() {
        assert_eq!(ArchiveFormat::from_name("a.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("a.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("checksums.txt"), None);
        assert_eq!(
            ArchiveFormat::from_content_type("application/gzip"),
            Some(ArchiveFormat::TarGz)
        );
    }

    #[test]
    fn builds_latest_and_tagged_urls() {
        let source = GithubReleases::new(Repository {
            api_base: "https://api.example.test/".to_string(),
            owner: "craftcms".to_string(),
            repo: "nitro".to_string(),
        });

        assert_eq!(
            source.release_url(None),
            "https://api.example.test/repos/craftcms/nitro/releases/latest"
        );
        assert_eq!(
            source.release_url(Some("v2.0.8")),
            "https://api.example.test/repos/craftcms/nitro/releases/tags/v2.0.8"
        );
    }

    #[test]
    fn latest_version_reads_tag_name() {
        let source = serve(|base| {
            HashMap::from([(
                "/repos/craftcms/nitro/releases/latest".to_string(),
                Route::ok(release_body("v2.0.8", base, &[])),
            )])
        });

        assert_eq!(source.latest_version().unwrap(), "v2.0.8");
    }

    #[test]
    fn missing_release_is_a_status_error() {
        let source = serve(|_| HashMap::new());

        let err = source.latest_version().unwrap_err();
        assert!(matches!(err, InstallError::Status { status: 404, .. }));
    }

    #[test]
    fn downloads_archive_with_listed_checksum() {
        let archive = tar_gz_archive(&[("nitro", b"binary")]);
        let digest = sha256_hex(&archive.bytes);
        let bytes = archive.bytes.clone();
        let source = serve(move |base| {
            HashMap::from([
                (
                    TAG_PATH.to_string(),
                    Route::ok(release_body(
                        "v2.0.8",
                        base,
                        &[
                            ("checksums.txt", "text/plain"),
                            ("nitro_darwin_x86_64.tar.gz", "application/gzip"),
                            (LINUX_ASSET, "application/gzip"),
                        ],
                    )),
                ),
                (format!("/download/{LINUX_ASSET}"), Route::ok(bytes)),
                (
                    "/download/checksums.txt".to_string(),
                    Route::ok(format!(
                        "{}  nitro_darwin_x86_64.tar.gz\n{digest}  {LINUX_ASSET}\n",
                        "0".repeat(64)
                    )),
                ),
            ])
        });

        let downloaded = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap();
        assert_eq!(downloaded.name, LINUX_ASSET);
        assert_eq!(downloaded.format, ArchiveFormat::TarGz);
        assert_eq!(downloaded.bytes, archive.bytes);
        assert_eq!(downloaded.sha256, Some(sha256_hex(&archive.bytes)));
    }

    #[test]
    fn archive_download_failure_is_a_status_error() {
        let source = serve(|base| {
            HashMap::from([(
                TAG_PATH.to_string(),
                Route::ok(release_body("v2.0.8", base, &[(LINUX_ASSET, "application/gzip")])),
            )])
        });

        let err = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap_err();
        assert!(matches!(err, InstallError::Status { status: 404, .. }));
    }

    #[test]
    fn release_without_platform_archive_is_reported() {
        let source = serve(|base| {
            HashMap::from([(
                TAG_PATH.to_string(),
                Route::ok(release_body(
                    "v2.0.8",
                    base,
                    &[("nitro_darwin_x86_64.tar.gz", "application/gzip")],
                )),
            )])
        });

        let err = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap_err();
        assert!(matches!(err, InstallError::NoMatchingAsset { .. }));
    }

    #[test]
    fn extensionless_asset_uses_response_content_type() {
        let archive = zip_archive(&[("nitro", b"binary")]);
        let bytes = archive.bytes.clone();
        let source = serve(move |base| {
            HashMap::from([
                (
                    TAG_PATH.to_string(),
                    Route::ok(release_body(
                        "v2.0.8",
                        base,
                        &[("nitro-linux-amd64-bundle", "application/octet-stream")],
                    )),
                ),
                (
                    "/download/nitro-linux-amd64-bundle".to_string(),
                    Route {
                        status: 200,
                        content_type: Some("application/zip"),
                        body: bytes,
                    },
                ),
            ])
        });

        let downloaded = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap();
        assert_eq!(downloaded.format, ArchiveFormat::Zip);
        assert_eq!(downloaded.sha256, None);
    }

    #[test]
    fn per_asset_digest_wins_over_listing() {
        let archive = tar_gz_archive(&[("nitro", b"binary")]);
        let digest = sha256_hex(&archive.bytes);
        let bytes = archive.bytes.clone();
        let source = serve(move |base| {
            HashMap::from([
                (
                    TAG_PATH.to_string(),
                    Route::ok(release_body(
                        "v2.0.8",
                        base,
                        &[
                            ("nitro_darwin_x86_64.tar.gz.sha256", "text/plain"),
                            ("checksums.txt", "text/plain"),
                            (LINUX_ASSET, "application/gzip"),
                            ("nitro_linux_x86_64.tar.gz.sha256", "text/plain"),
                        ],
                    )),
                ),
                (format!("/download/{LINUX_ASSET}"), Route::ok(bytes)),
                (
                    "/download/nitro_darwin_x86_64.tar.gz.sha256".to_string(),
                    Route::ok("a".repeat(64)),
                ),
                (
                    "/download/checksums.txt".to_string(),
                    Route::ok(format!("{}  {LINUX_ASSET}\n", "b".repeat(64))),
                ),
                (
                    format!("/download/{LINUX_ASSET}.sha256"),
                    Route::ok(format!("{digest}  {LINUX_ASSET}\n")),
                ),
            ])
        });

        let downloaded = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap();
        assert_eq!(downloaded.sha256, Some(sha256_hex(&archive.bytes)));
    }

    #[test]
    fn listing_without_the_archive_is_an_error() {
        let bytes = tar_gz_archive(&[("nitro", b"binary")]).bytes;
        let source = serve(move |base| {
            HashMap::from([
                (
                    TAG_PATH.to_string(),
                    Route::ok(release_body(
                        "v2.0.8",
                        base,
                        &[("checksums.txt", "text/plain"), (LINUX_ASSET, "application/gzip")],
                    )),
                ),
                (format!("/download/{LINUX_ASSET}"), Route::ok(bytes)),
                (
                    "/download/checksums.txt".to_string(),
                    Route::ok(format!("{}  nitro_darwin_x86_64.tar.gz\n", "0".repeat(64))),
                ),
            ])
        });

        let err = source
            .download_archive(&Platform::new("linux"), "v2.0.8")
            .unwrap_err();
        assert!(matches!(err, InstallError::ChecksumUnavailable { .. }));
    }

    #[test]
    fn sidecar_digest_accepts_bare_or_named_lines() {
        assert_eq!(sidecar_digest("ABCD\n").as_deref(), Some("abcd"));
        assert_eq!(
            sidecar_digest("abcd  nitro_linux_x86_64.tar.gz\n").as_deref(),
            Some("abcd")
        );
        assert_eq!(sidecar_digest("   \n"), None);
    }
}
