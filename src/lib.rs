//! A parser for Tor docs.
//!
//! This crate parses and validates the documents Tor directory authorities,
//! relays, bridges and measurement tools publish, as specified in
//! [dir-spec](https://gitlab.torproject.org/tpo/core/torspec/-/blob/main/dir-spec.txt):
//! consensuses and votes, bridge network statuses, server and extra-info
//! descriptors, microdescriptors, key certificates, exit lists, bridge pool
//! assignments, GetTor statistics and Torperf results.
//!
//! Documents can be parsed from bytes with [`parse_descriptors`], read from
//! directories and tar archives with [`DescriptorReader`], or downloaded
//! from directory authorities with [`DescriptorDownloader`]. Readers and
//! downloaders work on background threads and hand out their results
//! through a [`BlockingSequence`].

pub mod error;
pub use error::{DocumentParseError, MisuseError, SourceError, UnparseableDocument};

pub mod meta;
pub use meta::{Fingerprint, RawContent};

pub mod digest;
pub mod fields;
pub mod grammar;
pub mod split;

pub mod netstatus;

pub mod consensus;
#[doc(inline)]
pub use consensus::NetworkStatusConsensus;

pub mod vote;
#[doc(inline)]
pub use vote::NetworkStatusVote;

pub mod bridgestatus;
pub use bridgestatus::BridgeNetworkStatus;

pub mod server;
#[doc(inline)]
pub use server::ServerDescriptor;

pub mod extrainfo;
pub use extrainfo::ExtraInfoDescriptor;

pub mod microdesc;
pub use microdesc::Microdescriptor;

pub mod certificate;
pub use certificate::DirectoryKeyCertificate;

pub mod exitlist;
pub use exitlist::ExitList;

pub mod bridgepool;
pub use bridgepool::BridgePoolAssignment;

pub mod gettor;
pub use gettor::GettorStatistics;

pub mod torperf;
pub use torperf::TorperfResult;

pub mod descriptor;
#[doc(inline)]
pub use descriptor::{
    parse_descriptors, Descriptor, DescriptorKind, ParseOptions, ParseOptionsBuilder, TorDocument,
};

pub mod sequence;
pub use sequence::BlockingSequence;

pub mod history;
pub use history::ProcessedFileHistory;

pub mod reader;
pub use reader::{DescriptorFile, DescriptorReader, ReaderConfig, ReaderConfigBuilder};

pub mod download;
pub use download::{
    DescriptorDownloader, DescriptorFetcher, DirectoryPeer, DownloadResponse, DownloaderConfig,
    DownloaderConfigBuilder, RequestKind,
};
