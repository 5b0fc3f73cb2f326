use common::file_utils::{chunk_path, tmp_path};
use common::key_utils::{FileName, chunk_id_for, file_meta_key, node_key};
use common::url_utils::encode_path_segment;
use std::path::Path;

#[test]
fn test_shard_dirs_stability() {
    let name = FileName::parse("video.mp4").unwrap();
    let id = chunk_id_for(&name, 0, "token");

    let path1 = chunk_path(Path::new("/data"), &id);
    let path2 = chunk_path(Path::new("/data"), &id);
    assert_eq!(path1, path2);

    let other = chunk_id_for(&name, 1, "token");
    assert_ne!(path1, chunk_path(Path::new("/data"), &other));

    // data/chunks/xx/yy/<chunk_id>
    assert!(path1.starts_with("/data/chunks"));
    assert_eq!(path1.file_name().unwrap().to_str().unwrap(), id);

    let parent = path1.parent().unwrap();
    let shard2 = parent.file_name().unwrap().to_str().unwrap();
    let shard1 = parent.parent().unwrap().file_name().unwrap().to_str().unwrap();
    for shard in [shard1, shard2] {
        assert_eq!(shard.len(), 2);
        assert!(shard.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn test_meta_and_node_keys() {
    let name = FileName::parse("a b.txt").unwrap();
    let key = file_meta_key(&name, "");
    assert!(key.starts_with("file:"));
    assert!(key.ends_with(":a%20b%2Etxt"));
    assert_eq!(key, file_meta_key(&name, ""));

    assert_eq!(node_key("n-1"), "node:n-1");
}

#[test]
fn test_tmp_path_generation() {
    let p = tmp_path(Path::new("/data"), "abc");
    assert_eq!(p, Path::new("/data/tmp/abc"));
}

#[test]
fn test_chunk_id_survives_url_path_encoding() {
    let name = FileName::parse("report 2024.pdf").unwrap();
    let id = chunk_id_for(&name, 3, "secret");

    let segment = encode_path_segment(&id);
    assert!(!segment.contains('/'));
    let decoded = percent_encoding::percent_decode_str(&segment)
        .decode_utf8()
        .unwrap();
    assert_eq!(decoded, id);
}
