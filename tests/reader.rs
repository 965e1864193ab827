mod common;

use std::fs;
use std::path::Path;

use tordesc::{DescriptorKind, DescriptorReader, ReaderConfigBuilder, SourceError, TorDocument};

fn write_samples(dir: &Path) {
    fs::write(dir.join("server-descriptors"), format!("{}{}", common::RELAY, common::RELAY)).unwrap();
    fs::create_dir(dir.join("exit-lists")).unwrap();
    fs::write(
        dir.join("exit-lists").join("2012-02-29-23-02-02"),
        common::EXIT_LIST.replace("Downloaded 2012-02-29 23:02:02\n", ""),
    )
    .unwrap();
    fs::write(dir.join("broken"), "@type server-descriptor 1.0\nrouter moria1\n\n").unwrap();
}

#[test]
fn reads_directory_tree() {
    let data = tempfile::tempdir().unwrap();
    write_samples(data.path());

    let mut reader = DescriptorReader::new();
    reader.add_directory(data.path()).unwrap();
    let files: Vec<_> = reader.read_descriptors().unwrap().into_iter().collect();
    assert_eq!(files.len(), 3);

    let servers = files.iter().find(|f| f.file_name() == Some("server-descriptors")).unwrap();
    assert!(servers.is_ok());
    assert_eq!(servers.descriptors.len(), 2);
    assert_eq!(servers.descriptors[1].raw_bytes(), common::RELAY.as_bytes());
    assert_eq!(servers.directory.as_deref(), Some(data.path()));

    // The exit list takes its download time from the file name
    let exits = files.iter().find(|f| f.file_name() == Some("2012-02-29-23-02-02")).unwrap();
    assert_eq!(exits.descriptors[0].kind(), DescriptorKind::ExitList);

    let broken = files.iter().find(|f| f.file_name() == Some("broken")).unwrap();
    assert!(broken.descriptors.is_empty());
    assert!(matches!(broken.error, Some(SourceError::Parse(_))));

    assert_eq!(reader.processed_files().unwrap().len(), 3);
}

#[test]
fn history_replay_skips_unchanged_files() {
    let data = tempfile::tempdir().unwrap();
    write_samples(data.path());
    let state = tempfile::tempdir().unwrap();
    let history = state.path().join("parsed-files");

    let config = ReaderConfigBuilder::default()
        .directory(data.path())
        .history_file(&history)
        .build()
        .unwrap();

    let mut first = DescriptorReader::with_config(config.clone());
    assert_eq!(first.read_descriptors().unwrap().into_iter().count(), 3);
    first.processed_files();
    let after_first = fs::read_to_string(&history).unwrap();
    assert_eq!(after_first.lines().count(), 3);

    let mut second = DescriptorReader::with_config(config.clone());
    assert_eq!(second.read_descriptors().unwrap().into_iter().count(), 0);
    second.processed_files();
    assert_eq!(fs::read_to_string(&history).unwrap(), after_first);

    // A changed file is read again
    let servers = data.path().join("server-descriptors");
    let file = fs::File::options().write(true).open(&servers).unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(10))
        .unwrap();
    let mut third = DescriptorReader::with_config(config);
    let files: Vec<_> = third.read_descriptors().unwrap().into_iter().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name(), Some("server-descriptors"));
}

#[test]
fn reads_tar_archive() {
    let data = tempfile::tempdir().unwrap();
    let archive = data.path().join("descriptors.tar");
    {
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        for (name, content) in [
            ("consensuses/2011-11-30-09-00-00-consensus", common::CONSENSUS),
            ("microdescs/micro", common::MICRODESCS),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mtime(1322643600);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    let mut reader = DescriptorReader::new();
    reader.add_archive(&archive).unwrap();
    let files: Vec<_> = reader.read_descriptors().unwrap().into_iter().collect();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.archive.as_deref() == Some(archive.as_path())));
    assert_eq!(files[0].last_modified, 1322643600000);
    assert_eq!(files[0].descriptors[0].kind(), DescriptorKind::NetworkStatusConsensus);
    assert_eq!(files[1].descriptors.len(), 3);

    let mut missing = DescriptorReader::new();
    missing.add_archive(data.path().join("nope.tar")).unwrap();
    let files: Vec<_> = missing.read_descriptors().unwrap().into_iter().collect();
    assert!(matches!(files[0].error, Some(SourceError::Io { .. })));
}

#[test]
fn dropped_consumer_stops_reading() {
    let data = tempfile::tempdir().unwrap();
    for i in 0..5 {
        fs::write(data.path().join(format!("relay-{}", i)), common::RELAY).unwrap();
    }
    let state = tempfile::tempdir().unwrap();
    let history = state.path().join("parsed-files");

    let mut reader = DescriptorReader::new();
    reader.add_directory(data.path()).unwrap();
    reader.set_history_file(&history).unwrap();
    reader.set_max_files_in_queue(1).unwrap();
    drop(reader.read_descriptors().unwrap());

    // Joins instead of hanging on the full queue
    assert!(reader.processed_files().unwrap().len() < 5);
    assert!(!history.exists());
}

#[cfg(unix)]
#[test]
fn symlink_loops_are_read_once() {
    let data = tempfile::tempdir().unwrap();
    fs::create_dir(data.path().join("sub")).unwrap();
    fs::write(data.path().join("sub").join("relay"), common::RELAY).unwrap();
    std::os::unix::fs::symlink(data.path(), data.path().join("sub").join("loop")).unwrap();

    let mut reader = DescriptorReader::new();
    reader.add_directory(data.path()).unwrap();
    let files: Vec<_> = reader.read_descriptors().unwrap().into_iter().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name(), Some("relay"));
}
