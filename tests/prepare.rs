mod common;

use common::{scratch_dir, serve, tar_bytes, tree, write_tar, Item};
use rootbox::{
    errors::ImageError,
    image::{ImageSource, Preparer},
    remote::Fetcher,
};
use std::{fs, path::Path};

fn local_fetcher() -> Fetcher {
    Fetcher::with_client(reqwest::Client::builder().no_proxy().build().unwrap())
}

fn preparer(download_dir: &Path) -> Preparer {
    Preparer::builder()
        .fetcher(local_fetcher())
        .download_dir(download_dir)
        .build()
        .unwrap()
}

#[tokio::test]
async fn local_archive() {
    common::init_logging();
    let dir = scratch_dir("local");
    let archive = dir.join("text.tar");
    let root = dir.join("root");
    write_tar(&archive, &[Item::File("text", 0o644, b"hello")]);

    let prepared = preparer(&dir)
        .prepare(&ImageSource::new(archive.to_str().unwrap(), &root))
        .await
        .unwrap();

    assert_eq!(prepared, root);
    assert_eq!(fs::read(root.join("text")).unwrap(), b"hello");
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn local_archive_into_existing_root() {
    let dir = scratch_dir("existing");
    let archive = dir.join("etc.tar");
    let root = dir.join("root");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("keep"), b"untouched").unwrap();
    write_tar(
        &archive,
        &[
            Item::Dir("etc", 0o755),
            Item::File("etc/hostname", 0o644, b"box\n"),
        ],
    );

    preparer(&dir)
        .prepare(&ImageSource::new(archive.to_str().unwrap(), &root))
        .await
        .unwrap();

    assert_eq!(tree(&root), vec!["etc", "etc/hostname", "keep"]);
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn remote_archive() {
    common::init_logging();
    let dir = scratch_dir("remote");
    let downloads = dir.join("downloads");
    let root = dir.join("root");
    let base = serve(200, tar_bytes(&[Item::File("bin/hello", 0o755, b"#!/bin/sh\n")]));

    let prepared = preparer(&downloads)
        .prepare(&ImageSource::new(format!("{}/images/hello.tar", base), &root))
        .await
        .unwrap();

    assert_eq!(prepared, root);
    assert_eq!(tree(&root), vec!["bin", "bin/hello"]);
    // the download stays where it was put, in its own subdirectory
    let downloaded = tree(&downloads);
    assert_eq!(downloaded.len(), 2);
    assert!(downloaded[0].starts_with("rootbox-"));
    assert!(downloaded[1].ends_with("/hello.tar"));
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn remote_error_status() {
    let dir = scratch_dir("status");
    let root = dir.join("root");
    let base = serve(500, b"nope".to_vec());

    let result = preparer(&dir.join("downloads"))
        .prepare(&ImageSource::new(format!("{}/image.tar", base), &root))
        .await;

    match result {
        Err(ImageError::RemoteStatus(status)) => assert_eq!(status.as_u16(), 500),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!root.exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn remote_archive_needs_root_before_download() {
    let dir = scratch_dir("remote-noroot");
    let downloads = dir.join("downloads");
    let base = serve(200, tar_bytes(&[Item::File("text", 0o644, b"hello")]));

    let result = preparer(&downloads)
        .prepare(&ImageSource::new(format!("{}/image.tar", base), ""))
        .await;

    assert!(matches!(result, Err(ImageError::RootRequired)));
    assert!(!downloads.exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn cleanup_on_failure() {
    let dir = scratch_dir("cleanup");
    let downloads = dir.join("downloads");
    let root = dir.join("root");
    // gzip magic, rejected only after the download and the root exist
    let base = serve(200, vec![0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00]);
    let preparer = Preparer::builder()
        .fetcher(local_fetcher())
        .download_dir(&downloads)
        .cleanup_on_failure(true)
        .build()
        .unwrap();

    let result = preparer
        .prepare(&ImageSource::new(format!("{}/image.tar.gz", base), &root))
        .await;

    assert!(matches!(result, Err(ImageError::UnsupportedFormat("gzip"))));
    assert!(!root.exists());
    assert!(tree(&downloads).is_empty());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn no_cleanup_by_default() {
    let dir = scratch_dir("nocleanup");
    let archive = dir.join("image.tar.gz");
    let root = dir.join("root");
    fs::write(&archive, b"\x1f\x8b\x08\x00").unwrap();

    let result = preparer(&dir)
        .prepare(&ImageSource::new(archive.to_str().unwrap(), &root))
        .await;

    assert!(matches!(result, Err(ImageError::UnsupportedFormat(_))));
    assert!(root.is_dir());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn cleanup_keeps_existing_root() {
    let dir = scratch_dir("keeproot");
    let archive = dir.join("image.tar.gz");
    let root = dir.join("root");
    fs::create_dir(&root).unwrap();
    fs::write(&archive, b"\x1f\x8b\x08\x00").unwrap();
    let preparer = Preparer::builder()
        .fetcher(local_fetcher())
        .cleanup_on_failure(true)
        .build()
        .unwrap();

    let result = preparer
        .prepare(&ImageSource::new(archive.to_str().unwrap(), &root))
        .await;

    assert!(result.is_err());
    assert!(root.is_dir());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn fetch_named_file() {
    let dir = scratch_dir("named");
    let base = serve(200, b"payload".to_vec());

    let path = local_fetcher()
        .download(&format!("{}/a/b/thing.tar", base), &dir)
        .await
        .unwrap();

    assert!(path.is_absolute());
    assert_eq!(path, dir.join("thing.tar"));
    assert_eq!(fs::read(&path).unwrap(), b"payload");
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn fetch_without_file_name() {
    let dir = scratch_dir("unnamed");
    fs::write(dir.join("other"), b"existing").unwrap();
    let base = serve(200, b"payload".to_vec());

    let first = local_fetcher()
        .download(&format!("{}/", base), &dir)
        .await
        .unwrap();
    let second = local_fetcher()
        .download(&format!("{}/dir/", base), &dir)
        .await
        .unwrap();

    assert_ne!(first, second);
    for path in &[&first, &second] {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("rootbox-"), "{}", name);
        assert_eq!(fs::read(path).unwrap(), b"payload");
    }
    assert_eq!(fs::read(dir.join("other")).unwrap(), b"existing");
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn fetch_does_not_follow_redirects() {
    let dir = scratch_dir("redirect");
    let base = serve(302, Vec::new());

    let result = local_fetcher()
        .download(&format!("{}/moved.tar", base), &dir)
        .await;

    match result {
        Err(ImageError::RemoteStatus(status)) => assert_eq!(status.as_u16(), 302),
        other => panic!("unexpected {:?}", other),
    }
    assert!(tree(&dir).is_empty());
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn fetch_invalid_url() {
    let dir = scratch_dir("badurl");
    let result = local_fetcher().download("not a url", &dir).await;
    assert!(matches!(result, Err(ImageError::InvalidUrl(_))));
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn prepare_gives_a_sandbox() {
    let dir = scratch_dir("sandbox");
    let archive = dir.join("text.tar");
    let root = dir.join("root");
    write_tar(&archive, &[Item::File("text", 0o644, b"hello")]);

    let sandbox = rootbox::prepare(archive.to_str().unwrap(), &root)
        .await
        .unwrap();

    assert_eq!(sandbox.root(), root.as_path());
    assert_eq!(sandbox.state().unwrap(), rootbox::ProcessState::NotStarted);
    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn prepare_directory_in_place() {
    let dir = scratch_dir("inplace");

    let prepared = rootbox::prepare_image(dir.to_str().unwrap(), "")
        .await
        .unwrap();

    assert_eq!(prepared, dir);
    fs::remove_dir_all(&dir).unwrap();
}
