use super::types::{DependencyBlob, DependencyFile, DependencyManifest, DependencyPack};
use crate::error::GitDepsError;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize)]
#[serde(rename = "DependencyManifest")]
struct ManifestDocument {
    #[serde(rename = "@BaseUrl")]
    base_url: String,
    #[serde(rename = "@IgnoreProxy", default)]
    ignore_proxy: bool,
    #[serde(rename = "Files", default)]
    files: FileList,
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "Packs", default)]
    packs: PackList,
}

#[derive(Deserialize, Default)]
struct FileList {
    #[serde(rename = "File", default)]
    items: Vec<DependencyFile>,
}

#[derive(Deserialize, Default)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<DependencyBlob>,
}

#[derive(Deserialize, Default)]
struct PackList {
    #[serde(rename = "Pack", default)]
    items: Vec<DependencyPack>,
}

pub fn parse_manifest_str(content: &str) -> Result<DependencyManifest, quick_xml::DeError> {
    let document: ManifestDocument = quick_xml::de::from_str(content)?;
    Ok(DependencyManifest {
        base_url: document.base_url,
        ignore_proxy: document.ignore_proxy,
        files: document.files.items,
        blobs: document.blobs.items,
        packs: document.packs.items,
    })
}

pub fn parse_manifest(path: &Path) -> Result<DependencyManifest, GitDepsError> {
    let content = std::fs::read_to_string(path).map_err(|e| GitDepsError::ManifestParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_manifest_str(&content).map_err(|e| GitDepsError::ManifestParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<DependencyManifest xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" BaseUrl="http://cdn.example.com/deps" IgnoreProxy="true">
  <Files>
    <File Name="Engine/Binaries/tool.exe" Hash="1111111111111111111111111111111111111111" IsExecutable="true" />
    <File Name="Engine/Content/data.bin" Hash="2222222222222222222222222222222222222222" />
  </Files>
  <Blobs>
    <Blob Hash="1111111111111111111111111111111111111111" Size="100" PackHash="aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" PackOffset="0" />
    <Blob Hash="2222222222222222222222222222222222222222" Size="50" PackHash="aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" PackOffset="100" />
  </Blobs>
  <Packs>
    <Pack Hash="aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa" Size="150" CompressedSize="90" RemotePath="Build-1234" />
  </Packs>
</DependencyManifest>
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = parse_manifest_str(SAMPLE).unwrap();
        assert_eq!(manifest.base_url, "http://cdn.example.com/deps");
        assert!(manifest.ignore_proxy);
        assert_eq!(manifest.files.len(), 2);
        assert!(manifest.files[0].is_executable);
        assert!(!manifest.files[1].is_executable);
        assert_eq!(manifest.blobs[1].pack_offset, 100);
        assert_eq!(manifest.blobs[1].size, 50);
        assert_eq!(manifest.packs[0].compressed_size, 90);
        assert_eq!(manifest.packs[0].remote_path, "Build-1234");
    }

    #[test]
    fn test_parse_manifest_without_sections() {
        let manifest =
            parse_manifest_str(r#"<DependencyManifest BaseUrl="http://x"></DependencyManifest>"#)
                .unwrap();
        assert!(!manifest.ignore_proxy);
        assert!(manifest.files.is_empty());
        assert!(manifest.blobs.is_empty());
        assert!(manifest.packs.is_empty());
    }

    #[test]
    fn test_parse_manifest_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.gitdeps.xml");
        std::fs::write(&path, "<DependencyManifest><Files>").unwrap();

        let err = parse_manifest(&path).unwrap_err();
        assert!(matches!(err, GitDepsError::ManifestParse { .. }));
        assert!(err.to_string().contains("broken.gitdeps.xml"));
    }
}
