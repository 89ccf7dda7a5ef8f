//! Tools driven against in-process agent services over a real gRPC channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metallic_proto::agent::agent_server::{Agent as AgentService, AgentServer};
use metallic_proto::agent::{
    GetHostRequest, GetHostResponse, HealthCheckRequest, HealthCheckResponse, MetricsRequest,
    MetricsResponse,
};
use metallic_proto::browser::browser_server::{Browser as BrowserService, BrowserServer};
use metallic_proto::browser::{
    CreateSessionRequest, CreateSessionResponse, TerminateSessionRequest, TerminateSessionResponse,
};
use metallic_proto::filesystem::filesystem_server::{
    Filesystem as FilesystemService, FilesystemServer,
};
use metallic_proto::filesystem::{
    CreateDirectoryRequest, CreateDirectoryResponse, ExistsRequest, ExistsResponse, FileChunk,
    GetStatsRequest, GetStatsResponse, ReadDirectoryRequest, ReadDirectoryResponse,
    ReadFileRequest, ReadFileResponse, ReadFileStreamRequest, RenameRequest, RenameResponse,
    UnlinkRequest, UnlinkResponse, WatchEvent as WireWatchEvent, WatchRequest, WriteFileRequest,
    WriteFileResponse,
};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;
use tonic::{Request, Response, Status, Streaming};

use super::{Agent, Browser, BrowserLaunchOptions, FileContent, Filesystem, ReadFormat};
use crate::error::Error;
use crate::transport::AgentTransport;

const API_KEY: &str = "sk-test";

/// Serve `router` on an ephemeral local port and return a transport for it.
async fn serve(router: Router) -> AgentTransport {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(router.serve_with_incoming(TcpListenerStream::new(listener)));
    AgentTransport::new(&format!("http://{addr}"), API_KEY).unwrap()
}

fn bearer<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

// --- agent.Agent ---

struct FakeAgent {
    healthy: bool,
    seen_auth: Mutex<Vec<Option<String>>>,
}

impl FakeAgent {
    fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy,
            seen_auth: Mutex::new(Vec::new()),
        })
    }

    fn failure(&self) -> String {
        if self.healthy {
            String::new()
        } else {
            "agent degraded".into()
        }
    }
}

#[tonic::async_trait]
impl AgentService for FakeAgent {
    async fn health_check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        self.seen_auth.lock().unwrap().push(bearer(&request));
        Ok(Response::new(HealthCheckResponse {
            success: self.healthy,
            error: self.failure(),
        }))
    }

    async fn metrics(
        &self,
        _request: Request<MetricsRequest>,
    ) -> Result<Response<MetricsResponse>, Status> {
        Ok(Response::new(MetricsResponse {
            success: self.healthy,
            error: self.failure(),
            cpu_count: 4,
            cpu_used_pct: 12.5,
            mem_total_mib: 8192.0,
            mem_used_mib: 1024.0,
            gpu: Some("L4".into()),
            vram_total_mib: Some(24_576.0),
            vram_used_mib: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        }))
    }

    async fn get_host(
        &self,
        request: Request<GetHostRequest>,
    ) -> Result<Response<GetHostResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(GetHostResponse {
            success: self.healthy,
            error: self.failure(),
            host: format!("{}-{}-{}.test", req.template, req.virtual_machine_id, req.port),
        }))
    }
}

async fn agent_tool(fake: &Arc<FakeAgent>) -> Agent {
    let router = tonic::transport::Server::builder()
        .add_service(AgentServer::from_arc(Arc::clone(fake)));
    Agent::new(serve(router).await, "metallic-base".into(), "vm1".into())
}

#[tokio::test]
async fn health_check_sends_bearer_token() {
    let fake = FakeAgent::new(true);
    let agent = agent_tool(&fake).await;

    assert!(agent.health_check().await.unwrap());
    assert_eq!(
        *fake.seen_auth.lock().unwrap(),
        vec![Some(format!("Bearer {API_KEY}"))]
    );
}

#[tokio::test]
async fn metrics_are_copied_from_the_response() {
    let fake = FakeAgent::new(true);
    let metrics = agent_tool(&fake).await.metrics().await.unwrap();

    assert_eq!(metrics.cpu_count, 4);
    assert!((metrics.cpu_used_pct - 12.5).abs() < f64::EPSILON);
    assert!((metrics.mem_total_mib - 8192.0).abs() < f64::EPSILON);
    assert_eq!(metrics.gpu.as_deref(), Some("L4"));
    assert_eq!(metrics.vram_total_mib, Some(24_576.0));
    assert_eq!(metrics.vram_used_mib, None);
    assert_eq!(metrics.timestamp, "2026-01-01T00:00:00Z");
}

#[tokio::test]
async fn get_host_sends_template_vm_and_port() {
    let fake = FakeAgent::new(true);
    let host = agent_tool(&fake).await.get_host(8080).await.unwrap();
    assert_eq!(host, "metallic-base-vm1-8080.test");
}

#[tokio::test]
async fn unsuccessful_agent_responses_are_remote_errors() {
    let fake = FakeAgent::new(false);
    let agent = agent_tool(&fake).await;

    for err in [
        agent.health_check().await.unwrap_err(),
        agent.metrics().await.unwrap_err(),
        agent.get_host(80).await.unwrap_err(),
    ] {
        assert!(
            matches!(err, Error::Remote(ref m) if m == "agent degraded"),
            "{err:?}"
        );
    }
}

// --- filesystem.Filesystem ---

/// Files keyed by path, plus the format of every unary write.
#[derive(Default)]
struct MemoryFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    formats: Mutex<Vec<String>>,
}

impl MemoryFs {
    fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

const STREAM_CHUNK: usize = 4;

#[tonic::async_trait]
impl FilesystemService for MemoryFs {
    type ReadFileStreamStream =
        tokio_stream::Iter<std::vec::IntoIter<Result<FileChunk, Status>>>;
    type WatchStream = tokio_stream::Empty<Result<WireWatchEvent, Status>>;

    async fn read_file(
        &self,
        request: Request<ReadFileRequest>,
    ) -> Result<Response<ReadFileResponse>, Status> {
        let req = request.into_inner();
        let Some(bytes) = self.get(&req.path) else {
            return Ok(Response::new(ReadFileResponse {
                success: false,
                error: format!("ENOENT: no such file or directory, open '{}'", req.path),
                ..Default::default()
            }));
        };
        let resp = match req.format.as_str() {
            "text" => ReadFileResponse {
                success: true,
                content: String::from_utf8_lossy(&bytes).into_owned(),
                ..Default::default()
            },
            "bytes" => ReadFileResponse {
                success: true,
                binary: bytes,
                ..Default::default()
            },
            other => return Err(Status::invalid_argument(format!("bad format {other}"))),
        };
        Ok(Response::new(resp))
    }

    async fn read_file_stream(
        &self,
        request: Request<ReadFileStreamRequest>,
    ) -> Result<Response<Self::ReadFileStreamStream>, Status> {
        let path = request.into_inner().path;
        let bytes = self
            .get(&path)
            .ok_or_else(|| Status::not_found(path.clone()))?;
        let mut chunks: Vec<_> = bytes
            .chunks(STREAM_CHUNK)
            .map(|c| {
                Ok(FileChunk {
                    path: path.clone(),
                    content: c.to_vec(),
                    end: false,
                    error: String::new(),
                })
            })
            .collect();
        chunks.push(Ok(FileChunk {
            path,
            end: true,
            ..Default::default()
        }));
        Ok(Response::new(tokio_stream::iter(chunks)))
    }

    async fn write_file(
        &self,
        request: Request<WriteFileRequest>,
    ) -> Result<Response<WriteFileResponse>, Status> {
        let req = request.into_inner();
        let bytes = match req.format.as_str() {
            "text" => req.content.into_bytes(),
            "bytes" => req.binary,
            other => return Err(Status::invalid_argument(format!("bad format {other}"))),
        };
        self.formats.lock().unwrap().push(req.format);
        self.files.lock().unwrap().insert(req.path, bytes);
        Ok(Response::new(WriteFileResponse {
            success: true,
            error: String::new(),
        }))
    }

    async fn write_file_stream(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<WriteFileResponse>, Status> {
        let mut chunks = request.into_inner();
        let mut path = None;
        let mut bytes = Vec::new();
        while let Some(chunk) = chunks.message().await? {
            path.get_or_insert_with(|| chunk.path.clone());
            bytes.extend_from_slice(&chunk.content);
            if chunk.end {
                break;
            }
        }
        let path = path.ok_or_else(|| Status::invalid_argument("empty upload"))?;
        self.files.lock().unwrap().insert(path, bytes);
        Ok(Response::new(WriteFileResponse {
            success: true,
            error: String::new(),
        }))
    }

    async fn read_directory(
        &self,
        _request: Request<ReadDirectoryRequest>,
    ) -> Result<Response<ReadDirectoryResponse>, Status> {
        Err(Status::unimplemented("read_directory"))
    }

    async fn create_directory(
        &self,
        _request: Request<CreateDirectoryRequest>,
    ) -> Result<Response<CreateDirectoryResponse>, Status> {
        Err(Status::unimplemented("create_directory"))
    }

    async fn rename(
        &self,
        _request: Request<RenameRequest>,
    ) -> Result<Response<RenameResponse>, Status> {
        Err(Status::unimplemented("rename"))
    }

    async fn unlink(
        &self,
        request: Request<UnlinkRequest>,
    ) -> Result<Response<UnlinkResponse>, Status> {
        let removed = self
            .files
            .lock()
            .unwrap()
            .remove(&request.into_inner().path)
            .is_some();
        Ok(Response::new(UnlinkResponse {
            success: removed,
            error: if removed { String::new() } else { "ENOENT".into() },
        }))
    }

    async fn exists(
        &self,
        request: Request<ExistsRequest>,
    ) -> Result<Response<ExistsResponse>, Status> {
        let exists = self.get(&request.into_inner().path).is_some();
        Ok(Response::new(ExistsResponse {
            success: true,
            error: String::new(),
            exists,
        }))
    }

    async fn get_stats(
        &self,
        _request: Request<GetStatsRequest>,
    ) -> Result<Response<GetStatsResponse>, Status> {
        Err(Status::unimplemented("get_stats"))
    }

    async fn watch(
        &self,
        _request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        Err(Status::unimplemented("watch"))
    }
}

async fn filesystem_tool(fake: &Arc<MemoryFs>) -> Filesystem {
    let router = tonic::transport::Server::builder()
        .add_service(FilesystemServer::from_arc(Arc::clone(fake)));
    Filesystem::new(serve(router).await)
}

#[tokio::test]
async fn text_write_then_read_round_trips() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;

    fs.write_file("/home/user/notes.txt", "héllo\nworld").await.unwrap();
    let content = fs
        .read_file("/home/user/notes.txt", ReadFormat::Text)
        .await
        .unwrap();

    assert_eq!(content, FileContent::Text("héllo\nworld".into()));
    assert_eq!(*fake.formats.lock().unwrap(), ["text"]);
}

#[tokio::test]
async fn bytes_write_then_read_round_trips() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;
    let png = vec![0x89, b'P', b'N', b'G', 0x00, 0xff];

    fs.write_file("/tmp/pixel.png", png.clone()).await.unwrap();
    assert_eq!(fs.read_bytes("/tmp/pixel.png").await.unwrap(), png);
    assert_eq!(*fake.formats.lock().unwrap(), ["bytes"]);
}

#[tokio::test]
async fn missing_file_is_remote_error() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;

    let err = fs.read_to_string("/nope").await.unwrap_err();
    assert!(matches!(err, Error::Remote(ref m) if m.starts_with("ENOENT")));
}

#[tokio::test]
async fn streamed_upload_then_streamed_download() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;

    let mut writer = fs.create_write_stream("/data/log.txt");
    writer.write(b"first line\n".to_vec()).await.unwrap();
    writer.write(b"second line\n".to_vec()).await.unwrap();
    writer.finish().await.unwrap();
    assert_eq!(
        fake.get("/data/log.txt").unwrap(),
        b"first line\nsecond line\n"
    );

    let chunks: Vec<Vec<u8>> = fs
        .read_file_stream("/data/log.txt")
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert!(chunks.iter().all(|c| c.len() <= STREAM_CHUNK));
    assert_eq!(chunks.concat(), b"first line\nsecond line\n");
}

#[tokio::test]
async fn delete_then_exists_reports_absent() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;

    fs.write_file("/a", "x").await.unwrap();
    assert!(fs.exists("/a").await.unwrap());
    fs.delete("/a").await.unwrap();
    assert!(!fs.exists("/a").await.unwrap());
}

#[tokio::test]
async fn non_ok_status_is_rpc_error() {
    let fake = Arc::new(MemoryFs::default());
    let fs = filesystem_tool(&fake).await;

    let err = fs.stats("/a").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Rpc {
            code: tonic::Code::Unimplemented,
            ..
        }
    ));
}

// --- browser.Browser ---

#[derive(Default)]
struct FakeBrowser {
    refuse: bool,
    sessions: Mutex<Vec<CreateSessionRequest>>,
    terminated: Mutex<u32>,
}

#[tonic::async_trait]
impl BrowserService for FakeBrowser {
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionResponse>, Status> {
        self.sessions.lock().unwrap().push(request.into_inner());
        Ok(Response::new(if self.refuse {
            CreateSessionResponse {
                success: false,
                error: "browser already running".into(),
                cdp_port: 0,
            }
        } else {
            CreateSessionResponse {
                success: true,
                error: String::new(),
                cdp_port: 9222,
            }
        }))
    }

    async fn terminate_session(
        &self,
        _request: Request<TerminateSessionRequest>,
    ) -> Result<Response<TerminateSessionResponse>, Status> {
        *self.terminated.lock().unwrap() += 1;
        Ok(Response::new(TerminateSessionResponse {
            success: true,
            error: String::new(),
        }))
    }
}

async fn browser_tool(fake: &Arc<FakeBrowser>) -> Browser {
    let router = tonic::transport::Server::builder()
        .add_service(BrowserServer::from_arc(Arc::clone(fake)));
    Browser::new(
        serve(router).await,
        "metallic-browser".into(),
        "vm7".into(),
        "metallic.computer".into(),
    )
}

#[tokio::test]
async fn launch_returns_cdp_url_and_close_terminates() {
    let fake = Arc::new(FakeBrowser::default());
    let browser = browser_tool(&fake).await;

    let session = browser
        .launch(BrowserLaunchOptions {
            block_ads: Some(true),
            dimensions: Some((1280, 720)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        session.cdp_url,
        "https://metallic-browser-vm7-9222.metallic.computer"
    );

    {
        let sessions = fake.sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].block_ads, Some(true));
        let dims = sessions[0].dimensions.as_ref().unwrap();
        assert_eq!((dims.width, dims.height), (1280, 720));
        assert_eq!(sessions[0].context, None);
    }

    session.close().await.unwrap();
    assert_eq!(*fake.terminated.lock().unwrap(), 1);
}

#[tokio::test]
async fn refused_launch_is_remote_error() {
    let fake = Arc::new(FakeBrowser {
        refuse: true,
        ..Default::default()
    });
    let err = browser_tool(&fake)
        .await
        .launch(BrowserLaunchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote(ref m) if m == "browser already running"));
}
