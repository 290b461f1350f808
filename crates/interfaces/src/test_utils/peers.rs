use crate::{
    p2p::{
        error::{RequestError, RequestResult},
        peer::{DisconnectReason, PeerConnection},
    },
    test_utils::ChainFixture,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use strata_primitives::{
    BlockBody, BlockNumber, Bytes, Header, PeerId, Receipt, Transaction, B256, B512,
};

/// A scripted peer backed by a [`ChainFixture`].
///
/// Behavior knobs make it misbehave on demand: time out, corrupt bodies or
/// receipts, or serve raw node data for state sync tests.
#[derive(Debug)]
pub struct TestPeer {
    id: PeerId,
    chain: Arc<ChainFixture>,
    delay: Option<Duration>,
    timeout: AtomicBool,
    overserve_headers: AtomicBool,
    corrupt_bodies: AtomicBool,
    corrupt_receipts: AtomicBool,
    corrupt_node_data: AtomicBool,
    disconnected: AtomicBool,
    requests: AtomicU64,
    node_data: Mutex<HashMap<B256, Bytes>>,
}

impl TestPeer {
    /// Create a peer with the given one-byte id serving from `chain`.
    pub fn new(id: u8, chain: Arc<ChainFixture>) -> Self {
        Self {
            id: B512::repeat_byte(id),
            chain,
            delay: None,
            timeout: AtomicBool::new(false),
            overserve_headers: AtomicBool::new(false),
            corrupt_bodies: AtomicBool::new(false),
            corrupt_receipts: AtomicBool::new(false),
            corrupt_node_data: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            requests: AtomicU64::new(0),
            node_data: Mutex::new(HashMap::new()),
        }
    }

    /// Delay every response by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Preload raw node data served by hash.
    pub fn with_node_data(self, data: HashMap<B256, Bytes>) -> Self {
        *self.node_data.lock().unwrap() = data;
        self
    }

    /// The peer's id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Make every request time out from now on.
    pub fn set_timeout(&self, val: bool) {
        self.timeout.store(val, Ordering::SeqCst);
    }

    /// Serve one header more than each request asked for.
    pub fn set_overserve_headers(&self, val: bool) {
        self.overserve_headers.store(val, Ordering::SeqCst);
    }

    /// Serve bodies with an extra injected transaction.
    pub fn set_corrupt_bodies(&self, val: bool) {
        self.corrupt_bodies.store(val, Ordering::SeqCst);
    }

    /// Serve receipt lists with the last receipt dropped.
    pub fn set_corrupt_receipts(&self, val: bool) {
        self.corrupt_receipts.store(val, Ordering::SeqCst);
    }

    /// Serve node data with a flipped first byte.
    pub fn set_corrupt_node_data(&self, val: bool) {
        self.corrupt_node_data.store(val, Ordering::SeqCst);
    }

    /// Whether `disconnect` was called on this peer.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Number of requests served or failed.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    async fn pre_request(&self) -> RequestResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(RequestError::ConnectionDropped)
        }
        if self.timeout.load(Ordering::SeqCst) {
            return Err(RequestError::Timeout)
        }
        Ok(())
    }
}

#[async_trait]
impl PeerConnection for TestPeer {
    async fn get_headers(&self, start: BlockNumber, limit: u64) -> RequestResult<Vec<Header>> {
        self.pre_request().await?;
        let limit = if self.overserve_headers.load(Ordering::SeqCst) { limit + 1 } else { limit };
        Ok(self
            .chain
            .headers_range(start, limit)
            .into_iter()
            .map(|sealed| sealed.unseal())
            .collect())
    }

    async fn get_block_bodies(&self, hashes: Vec<B256>) -> RequestResult<Vec<BlockBody>> {
        self.pre_request().await?;
        let corrupt = self.corrupt_bodies.load(Ordering::SeqCst);
        let mut bodies = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let Some(body) = self.chain.body(&hash) else { break };
            let mut body = body.clone();
            if corrupt {
                body.transactions.push(Transaction::default());
            }
            bodies.push(body);
        }
        Ok(bodies)
    }

    async fn get_receipts(&self, hashes: Vec<B256>) -> RequestResult<Vec<Vec<Receipt>>> {
        self.pre_request().await?;
        let corrupt = self.corrupt_receipts.load(Ordering::SeqCst);
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let Some(receipts) = self.chain.receipts(&hash) else { break };
            let mut receipts = receipts.clone();
            if corrupt {
                receipts.pop();
            }
            out.push(receipts);
        }
        Ok(out)
    }

    async fn get_node_data(&self, hashes: Vec<B256>) -> RequestResult<Vec<Bytes>> {
        self.pre_request().await?;
        let corrupt = self.corrupt_node_data.load(Ordering::SeqCst);
        let store = self.node_data.lock().unwrap();
        let mut out = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(bytes) = store.get(&hash) {
                let mut bytes = bytes.to_vec();
                if corrupt && !bytes.is_empty() {
                    bytes[0] ^= 0xff;
                }
                out.push(bytes.into());
            }
        }
        Ok(out)
    }

    fn disconnect(&self, _reason: DisconnectReason) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}
