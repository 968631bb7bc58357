use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::model::{Entry, UpsertRequest};
use crate::updater::CacheStats;
use crate::vector::SearchHit;
use crate::RealtimeCache;

/// Requests longer than this close the connection
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

pub const DEFAULT_TOP_K: usize = 5;

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// One line of client input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Upsert(UpsertRequest),
    Get { id: String },
    Delete { id: String },
    Search {
        vector: Vec<f32>,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
    Stats,
    Flush,
}

/// One line of server output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Upserted,
    Found { entry: Entry },
    NotFound,
    Deleted { existed: bool },
    Hits { hits: Vec<SearchHit> },
    Stats { stats: CacheStats },
    Flushed { delivered: usize },
    Error { message: String },
}

/// Apply one request against the cache.
pub fn dispatch(cache: &RealtimeCache, request: Request) -> Response {
    let result = match request {
        Request::Upsert(req) => cache.upsert(req).map(|_| Response::Upserted),
        Request::Get { id } => cache.get(&id).map(|found| match found {
            Some(entry) => Response::Found { entry },
            None => Response::NotFound,
        }),
        Request::Delete { id } => cache.delete(&id).map(|existed| Response::Deleted { existed }),
        Request::Search { vector, top_k } => cache.search_cache(&vector, top_k).map(|hits| Response::Hits { hits }),
        Request::Stats => cache.get_stats().map(|stats| Response::Stats { stats }),
        Request::Flush => cache.flush_now().map(|delivered| Response::Flushed { delivered }),
    };
    result.unwrap_or_else(|e| Response::Error { message: e.to_string() })
}

pub struct CacheServer {
    cache: Arc<RealtimeCache>,
}

impl CacheServer {
    pub fn new(cache: Arc<RealtimeCache>) -> Self {
        Self { cache }
    }

    /// Accept clients until the task is dropped.
    pub async fn run(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "cache server listening");
        }

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let cache = self.cache.clone();
                    tokio::spawn(async move {
                        debug!(%peer, "client connected");
                        if let Err(e) = handle_client(socket, cache).await {
                            // Ignore expected disconnections to keep logs clean
                            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                                warn!(%peer, error = %e, "client error");
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "connection failed"),
            }
        }
    }
}

async fn handle_client(stream: TcpStream, cache: Arc<RealtimeCache>) -> std::io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = (&mut reader).take(MAX_LINE_BYTES as u64 + 1).read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(());
        }

        // Length is checked on raw bytes; the cut may split a UTF-8 sequence
        if !line.ends_with(b"\n") && line.len() > MAX_LINE_BYTES {
            warn!(bytes = line.len(), "request too large, closing connection");
            let response = Response::Error { message: format!("request exceeds {} bytes", MAX_LINE_BYTES) };
            write_response(&mut writer, &response).await?;
            return Ok(());
        }

        let response = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => match serde_json::from_str::<Request>(text.trim()) {
                Ok(request) => dispatch(&cache, request),
                Err(e) => Response::Error { message: format!("bad request: {}", e) },
            },
            Err(e) => Response::Error { message: format!("bad request: {}", e) },
        };
        write_response(&mut writer, &response).await?;
    }
}

async fn write_response<W: AsyncWriteExt + Unpin>(writer: &mut W, response: &Response) -> std::io::Result<()> {
    let mut out = serde_json::to_vec(response)?;
    out.push(b'\n');
    writer.write_all(&out).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::sink::MemorySink;

    fn cache() -> Arc<RealtimeCache> {
        let config = CacheConfig { enable_wal: false, max_cache_size: 10, ..CacheConfig::default() };
        Arc::new(RealtimeCache::open(config, Arc::new(MemorySink::new())).unwrap())
    }

    #[test]
    fn requests_parse_from_json_lines() {
        let upsert: Request = serde_json::from_str(r#"{"op":"upsert","id":"a","vector":[1.0,2.0],"metadata":{"lang":"rs"}}"#).unwrap();
        match upsert {
            Request::Upsert(req) => {
                assert_eq!(req.id, "a");
                assert_eq!(req.vector, Some(vec![1.0, 2.0]));
                assert_eq!(req.metadata["lang"], "rs");
                assert!(req.text.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let search: Request = serde_json::from_str(r#"{"op":"search","vector":[1.0]}"#).unwrap();
        assert_eq!(search, Request::Search { vector: vec![1.0], top_k: DEFAULT_TOP_K });

        let stats: Request = serde_json::from_str(r#"{"op":"stats"}"#).unwrap();
        assert_eq!(stats, Request::Stats);
    }

    #[test]
    fn dispatch_covers_the_operation_set() {
        let cache = cache();

        let up = dispatch(&cache, Request::Upsert(UpsertRequest::new("a").vector(vec![1.0, 0.0])));
        assert_eq!(up, Response::Upserted);

        match dispatch(&cache, Request::Get { id: "a".into() }) {
            Response::Found { entry } => assert_eq!(entry.id, "a"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(dispatch(&cache, Request::Get { id: "zzz".into() }), Response::NotFound);

        match dispatch(&cache, Request::Search { vector: vec![1.0, 0.0], top_k: 3 }) {
            Response::Hits { hits } => assert_eq!(hits.len(), 1),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(dispatch(&cache, Request::Flush), Response::Flushed { delivered: 1 });
        assert_eq!(dispatch(&cache, Request::Delete { id: "a".into() }), Response::Deleted { existed: true });

        match dispatch(&cache, Request::Stats) {
            Response::Stats { stats } => {
                assert_eq!(stats.inserts, 1);
                assert_eq!(stats.flushes, 1);
                assert_eq!(stats.cache_size, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn stopped_cache_reports_errors() {
        let cache = cache();
        cache.stop().await.unwrap();
        assert!(matches!(dispatch(&cache, Request::Get { id: "a".into() }), Response::Error { .. }));
        assert!(matches!(dispatch(&cache, Request::Stats), Response::Stats { .. }));
    }

    #[tokio::test]
    async fn serves_json_lines_over_tcp() {
        let cache = cache();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CacheServer::new(cache.clone());
        let task = tokio::spawn(async move { server.run(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{\"op\":\"upsert\",\"id\":\"x\",\"text\":\"hello\"}\n").await.unwrap();
        let reply: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, Response::Upserted);

        writer.write_all(b"not json\n{\"op\":\"get\",\"id\":\"x\"}\n").await.unwrap();
        let bad: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(bad, Response::Error { .. }));
        let found: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match found {
            Response::Found { entry } => assert_eq!(entry.text.as_deref(), Some("hello")),
            other => panic!("unexpected {:?}", other),
        }

        task.abort();
    }

    #[tokio::test]
    async fn oversized_line_gets_an_error_even_mid_character() {
        let cache = cache();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CacheServer::new(cache.clone());
        let task = tokio::spawn(async move { server.run(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // The read limit lands on the second byte of the two-byte 'é'
        let mut payload = vec![b'a'; MAX_LINE_BYTES];
        payload.extend_from_slice("é tail\n".as_bytes());
        let send = tokio::spawn(async move {
            let _ = writer.write_all(&payload).await;
            writer
        });

        let reply: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        match reply {
            Response::Error { message } => assert!(message.contains("exceeds")),
            other => panic!("unexpected {:?}", other),
        }

        let _ = send.await;
        task.abort();
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_bad_request() {
        let cache = cache();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CacheServer::new(cache.clone());
        let task = tokio::spawn(async move { server.run(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"\xff\xfe\n{\"op\":\"stats\"}\n").await.unwrap();
        let bad: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(bad, Response::Error { .. }));
        let stats: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(stats, Response::Stats { .. }));

        task.abort();
    }
}
