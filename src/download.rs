//! Downloading the current consensus and votes from many directory peers
//! in parallel.
//!
//! One worker thread per peer asks a coordinator thread for work, fetches
//! it and hands the response back. The coordinator owns all scheduling
//! state, publishes every response on the result sequence and closes it
//! once nothing is left to do or the global timeout passed.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::descriptor::{self, Descriptor, ParseOptions};
use crate::error::{MisuseError, SourceError};
use crate::meta::Fingerprint;
use crate::sequence::BlockingSequence;

pub mod fetch;
pub use fetch::{DescriptorFetcher, FetchResult, HttpFetcher};

//
// External dependencies
//
use chrono::{DateTime, Utc};
use derive_builder::Builder;
use rand::seq::IteratorRandom;

const CONSENSUS_PATH: &str = "/tor/status-vote/current/consensus.z";

/// A directory authority or mirror to download from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryPeer {
    pub nickname: String,
    /// `host:port` of the directory port
    pub address: String,
    /// Only authorities serve votes
    pub is_authority: bool,
}

impl DirectoryPeer {
    pub fn authority(nickname: impl Into<String>, address: impl Into<String>) -> Self {
        DirectoryPeer {
            nickname: nickname.into(),
            address: address.into(),
            is_authority: true,
        }
    }

    pub fn mirror(nickname: impl Into<String>, address: impl Into<String>) -> Self {
        DirectoryPeer {
            nickname: nickname.into(),
            address: address.into(),
            is_authority: false,
        }
    }
}

/// What to download from whom
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct DownloaderConfig {
    #[builder(setter(each(name = "peer")))]
    pub peers: Vec<DirectoryPeer>,
    pub download_consensus: bool,
    /// Fetch the consensus once from every peer instead of once in total
    pub consensus_from_every_peer: bool,
    /// Also fetch the votes of all authorities listed in a fetched consensus
    pub include_referenced_votes: bool,
    /// Votes to fetch, by authority identity
    #[builder(setter(each(name = "vote")))]
    pub votes: Vec<Fingerprint>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// After this the run concludes, whatever is still in flight
    pub global_timeout: Duration,
    pub parse_options: ParseOptions,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            peers: Vec::new(),
            download_consensus: true,
            consensus_from_every_peer: false,
            include_referenced_votes: false,
            votes: Vec::new(),
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            global_timeout: Duration::from_secs(60 * 60),
            parse_options: ParseOptions::default(),
        }
    }
}

/// The document a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Consensus,
    Vote(Fingerprint),
}

impl RequestKind {
    pub fn path(&self) -> String {
        match self {
            RequestKind::Consensus => CONSENSUS_PATH.to_string(),
            RequestKind::Vote(fingerprint) => format!("/tor/status-vote/current/{}.z", fingerprint),
        }
    }

    /// `consensus` or `vote`
    pub fn tag(&self) -> &'static str {
        match self {
            RequestKind::Consensus => "consensus",
            RequestKind::Vote(_) => "vote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub peer: DirectoryPeer,
    pub kind: RequestKind,
    pub path: String,
}

/// The outcome of one request
#[derive(Debug)]
pub struct DownloadResponse {
    pub request: DownloadRequest,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    /// HTTP status, absent if no response arrived
    pub status: Option<u16>,
    /// The decompressed body
    pub body: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
    pub error: Option<SourceError>,
}

impl DownloadResponse {
    fn pending(request: DownloadRequest) -> Self {
        let started = Utc::now();
        DownloadResponse {
            request,
            started,
            finished: started,
            status: None,
            body: Vec::new(),
            descriptors: Vec::new(),
            error: None,
        }
    }

    /// Whether the requested document arrived and parsed
    pub fn is_success(&self) -> bool {
        self.status == Some(200)
            && self.error.is_none()
            && !self.descriptors.is_empty()
            && self.answers_request()
    }

    /// Whether every decoded document is the one asked for
    fn answers_request(&self) -> bool {
        self.descriptors.iter().all(|d| match (self.request.kind, d) {
            (RequestKind::Consensus, Descriptor::NetworkStatusConsensus(_)) => true,
            (RequestKind::Vote(identity), Descriptor::NetworkStatusVote(vote)) => vote.identity() == identity,
            _ => false,
        })
    }

    fn referenced_votes(&self) -> Vec<Fingerprint> {
        self.descriptors
            .iter()
            .filter_map(|d| match d {
                Descriptor::NetworkStatusConsensus(c) => Some(c.referenced_votes()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Downloads documents as configured; runs once
pub struct DescriptorDownloader {
    config: DownloaderConfig,
    fetcher: Arc<dyn DescriptorFetcher>,
    started: bool,
}

impl DescriptorDownloader {
    pub fn new(config: DownloaderConfig) -> Self {
        let fetcher = HttpFetcher::new(config.connect_timeout, config.read_timeout);
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    pub fn with_fetcher(config: DownloaderConfig, fetcher: Arc<dyn DescriptorFetcher>) -> Self {
        DescriptorDownloader {
            config,
            fetcher,
            started: false,
        }
    }

    /// Start the coordinator and one worker per peer. Responses are
    /// published as they arrive.
    pub fn download_descriptors(&mut self) -> Result<BlockingSequence<DownloadResponse>, MisuseError> {
        if self.started {
            return Err(MisuseError::AlreadyStarted);
        }
        if self.config.peers.is_empty() {
            return Err(MisuseError::NoPeers);
        }
        if !self.config.download_consensus && self.config.votes.is_empty() {
            return Err(MisuseError::NothingToDownload);
        }
        self.started = true;

        let results = BlockingSequence::new();
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(self.config.clone(), results.clone());
        std::thread::spawn(move || coordinator.run(rx));

        for (index, peer) in self.config.peers.iter().enumerate() {
            let worker = PeerWorker {
                index,
                peer: peer.clone(),
                coordinator: tx.clone(),
                fetcher: Arc::clone(&self.fetcher),
                options: self.config.parse_options.clone(),
            };
            std::thread::spawn(move || worker.run());
        }
        Ok(results)
    }
}

enum Message {
    NextRequest {
        peer: usize,
        reply: mpsc::Sender<Option<DownloadRequest>>,
    },
    Deliver {
        peer: usize,
        response: DownloadResponse,
    },
}

struct PeerWorker {
    index: usize,
    peer: DirectoryPeer,
    coordinator: mpsc::Sender<Message>,
    fetcher: Arc<dyn DescriptorFetcher>,
    options: ParseOptions,
}

impl PeerWorker {
    fn run(self) {
        loop {
            let (reply, answer) = mpsc::channel();
            let asked = self.coordinator.send(Message::NextRequest {
                peer: self.index,
                reply,
            });
            // A closed channel means the run concluded
            let request = match asked.ok().and_then(|_| answer.recv().ok()).flatten() {
                Some(request) => request,
                None => break,
            };
            let response = match panic::catch_unwind(AssertUnwindSafe(|| self.perform(request.clone()))) {
                Ok(response) => response,
                Err(payload) => self.panicked(request, payload),
            };
            let delivered = self.coordinator.send(Message::Deliver {
                peer: self.index,
                response,
            });
            if delivered.is_err() {
                break;
            }
        }
        tracing::debug!(peer = %self.peer.nickname, "peer worker finished");
    }

    fn perform(&self, request: DownloadRequest) -> DownloadResponse {
        let mut response = DownloadResponse::pending(request);
        match self.fetcher.fetch(&self.peer, &response.request.path) {
            Ok(FetchResult { status, body }) => {
                response.status = Some(status);
                if status == 200 {
                    match descriptor::parse_descriptors(&body, None, &self.options) {
                        Ok(descriptors) => response.descriptors = descriptors,
                        Err(e) => response.error = Some(SourceError::Parse(e)),
                    }
                }
                response.body = body;
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer.nickname, path = %response.request.path, error = %e, "request failed");
                response.error = Some(e);
            }
        }
        response.finished = Utc::now();
        tracing::debug!(
            peer = %self.peer.nickname,
            path = %response.request.path,
            status = ?response.status,
            "response received"
        );
        response
    }

    /// The failed response for a request whose fetch or parse panicked
    fn panicked(&self, request: DownloadRequest, payload: Box<dyn Any + Send>) -> DownloadResponse {
        let message = payload
            .downcast_ref::<&str>()
            .map(|m| m.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(peer = %self.peer.nickname, path = %request.path, %message, "worker panicked");
        let mut response = DownloadResponse::pending(request);
        response.error = Some(SourceError::WorkerPanic {
            path: response.request.path.clone(),
            message,
        });
        response
    }
}

/// Scheduling state, owned by the coordinator thread
struct Schedule {
    config: DownloaderConfig,
    consensus_missing: bool,
    consensus_in_flight: HashSet<usize>,
    consensus_attempted: HashSet<usize>,
    missing_votes: BTreeSet<Fingerprint>,
    votes_in_flight: HashMap<usize, Fingerprint>,
    votes_attempted: HashMap<usize, HashSet<Fingerprint>>,
    /// Every vote ever put on the missing list
    requested_votes: HashSet<Fingerprint>,
    /// Peers whose worker went away
    gone: HashSet<usize>,
}

impl Schedule {
    fn new(config: DownloaderConfig) -> Self {
        let missing_votes: BTreeSet<Fingerprint> = config.votes.iter().copied().collect();
        Schedule {
            consensus_missing: config.download_consensus,
            consensus_in_flight: HashSet::new(),
            consensus_attempted: HashSet::new(),
            requested_votes: missing_votes.iter().copied().collect(),
            missing_votes,
            votes_in_flight: HashMap::new(),
            votes_attempted: HashMap::new(),
            gone: HashSet::new(),
            config,
        }
    }

    fn peer(&self, index: usize) -> &DirectoryPeer {
        &self.config.peers[index]
    }

    fn wants_consensus_from(&self, peer: usize) -> bool {
        if !self.config.download_consensus || self.consensus_attempted.contains(&peer) {
            return false;
        }
        if self.config.consensus_from_every_peer {
            return !self.consensus_in_flight.contains(&peer);
        }
        self.consensus_missing && self.consensus_in_flight.is_empty()
    }

    fn has_attempted(&self, peer: usize, vote: &Fingerprint) -> bool {
        self.votes_attempted
            .get(&peer)
            .map_or(false, |attempted| attempted.contains(vote))
    }

    /// Pick work for `peer` and mark it in flight: the consensus first,
    /// then a random missing vote nobody is fetching right now
    fn next_request_for(&mut self, peer: usize) -> Option<DownloadRequest> {
        let kind = if self.wants_consensus_from(peer) {
            self.consensus_in_flight.insert(peer);
            RequestKind::Consensus
        } else if self.peer(peer).is_authority && !self.votes_in_flight.contains_key(&peer) {
            let in_flight: HashSet<&Fingerprint> = self.votes_in_flight.values().collect();
            let vote = *self
                .missing_votes
                .iter()
                .filter(|v| !in_flight.contains(v) && !self.has_attempted(peer, v))
                .choose(&mut rand::thread_rng())?;
            self.votes_in_flight.insert(peer, vote);
            RequestKind::Vote(vote)
        } else {
            return None;
        };
        Some(DownloadRequest {
            peer: self.peer(peer).clone(),
            kind,
            path: kind.path(),
        })
    }

    fn deliver(&mut self, peer: usize, response: &DownloadResponse) {
        let success = response.is_success();
        match response.request.kind {
            RequestKind::Consensus => {
                self.consensus_in_flight.remove(&peer);
                self.consensus_attempted.insert(peer);
                if success {
                    self.consensus_missing = false;
                    if self.config.include_referenced_votes {
                        for vote in response.referenced_votes() {
                            if self.requested_votes.insert(vote) {
                                tracing::debug!(vote = %vote, "consensus references a new vote");
                                self.missing_votes.insert(vote);
                            }
                        }
                    }
                }
            }
            RequestKind::Vote(vote) => {
                self.votes_in_flight.remove(&peer);
                self.votes_attempted.entry(peer).or_default().insert(vote);
                if success {
                    self.missing_votes.remove(&vote);
                }
            }
        }
    }

    /// Release whatever `peer` had in flight and stop waiting for it
    fn peer_gone(&mut self, peer: usize) {
        self.consensus_in_flight.remove(&peer);
        self.votes_in_flight.remove(&peer);
        self.gone.insert(peer);
    }

    /// Whether every peer that could still do something useful has done it
    fn is_finished(&self) -> bool {
        let peers = (0..self.config.peers.len()).filter(|p| !self.gone.contains(p));
        let all_attempted_consensus = peers.clone().all(|p| self.consensus_attempted.contains(&p));
        let consensus_settled = !self.config.download_consensus
            || (self.consensus_in_flight.is_empty()
                && (all_attempted_consensus
                    || (!self.consensus_missing && !self.config.consensus_from_every_peer)));
        let votes_settled = self.votes_in_flight.is_empty()
            && self.missing_votes.iter().all(|vote| {
                peers
                    .clone()
                    .filter(|p| self.peer(*p).is_authority)
                    .all(|p| self.has_attempted(p, vote))
            });
        consensus_settled && votes_settled
    }
}

struct Coordinator {
    schedule: Schedule,
    results: BlockingSequence<DownloadResponse>,
    /// Workers waiting for work, answered as soon as some appears
    waiting: Vec<(usize, mpsc::Sender<Option<DownloadRequest>>)>,
    deadline: Instant,
}

impl Coordinator {
    fn new(config: DownloaderConfig, results: BlockingSequence<DownloadResponse>) -> Self {
        Coordinator {
            deadline: Instant::now() + config.global_timeout,
            schedule: Schedule::new(config),
            results,
            waiting: Vec::new(),
        }
    }

    fn run(mut self, messages: mpsc::Receiver<Message>) {
        let _guard = self.results.close_guard();
        tracing::info!(peers = self.schedule.config.peers.len(), "starting downloads");
        while !self.schedule.is_finished() {
            let timeout = self.deadline.saturating_duration_since(Instant::now());
            match messages.recv_timeout(timeout) {
                Ok(Message::NextRequest { peer, reply }) => {
                    self.waiting.push((peer, reply));
                }
                Ok(Message::Deliver { peer, response }) => {
                    self.schedule.deliver(peer, &response);
                    if self.results.publish(response).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!("global download timeout reached, abandoning open requests");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.serve_waiting();
        }
        self.conclude();
    }

    /// Hand out work to waiting workers that can get some
    fn serve_waiting(&mut self) {
        let mut still_waiting = Vec::new();
        for (peer, reply) in self.waiting.drain(..) {
            match self.schedule.next_request_for(peer) {
                Some(request) => {
                    tracing::debug!(peer = %request.peer.nickname, path = %request.path, "scheduling request");
                    if reply.send(Some(request)).is_err() {
                        tracing::warn!(peer, "worker vanished, rescheduling its request");
                        self.schedule.peer_gone(peer);
                    }
                }
                None => still_waiting.push((peer, reply)),
            }
        }
        self.waiting = still_waiting;
    }

    fn conclude(mut self) {
        for (_, reply) in self.waiting.drain(..) {
            let _ = reply.send(None);
        }
        let _ = self.results.close();
        tracing::info!(
            missing_votes = self.schedule.missing_votes.len(),
            consensus_missing = self.schedule.consensus_missing,
            "downloads concluded"
        );
    }
}
