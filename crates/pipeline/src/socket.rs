//! 소켓 소스 노드
//!
//! UDP 데이터그램 또는 TCP 스트림으로 syslog 라인을 받아 레코드로
//! 퍼뜨립니다. 기본 파서는 네트워크 와이어 형식(`syslog_rfc3164`)
//! 입니다.
//!
//! TCP는 한 번에 한 연결만 처리합니다. 릴레이 장비 하나가 긴 세션을
//! 유지하는 배치 구성을 가정하며, 대기 중인 연결은 백로그에서
//! 기다립니다.

use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use relaypost_core::{NamedSink, Node, NodeDecl, NodeError};

use crate::parser::ParserSet;
use crate::registry::BuildContext;
use crate::source::{Broadcaster, CatchupFilter};
use crate::state::StateStore;

/// 수신 대기와 읽기의 폴링 주기. 이 주기마다 종료 플래그를 확인합니다.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// UDP 데이터그램 최대 수신 크기
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// 수신 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SocketProtocol {
    Udp,
    Tcp,
}

/// `syslog_socket` 노드 파라미터
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SocketSourceParams {
    /// 수신 주소. 포트 0이면 임시 포트가 배정됩니다.
    bind_addr: String,
    /// `udp` 또는 `tcp`
    protocol: SocketProtocol,
    /// 파서 포맷 이름. 생략하면 `syslog_rfc3164`.
    #[serde(default)]
    parser: Option<String>,
    /// 저장된 `last_msg_ts` 기준 캐치업을 쓸지 (전역 resume과 AND)
    #[serde(default = "default_resume")]
    resume: bool,
}

fn default_resume() -> bool {
    true
}

enum Listener {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

/// 네트워크로 syslog를 받아 레코드를 퍼뜨리는 소스 노드
pub struct SocketSource {
    name: String,
    configured_outputs: Vec<String>,
    sinks: Mutex<Vec<NamedSink>>,
    listener: Mutex<Option<Listener>>,
    local_addr: SocketAddr,
    parsers: Arc<ParserSet>,
    resume: bool,
    state: Arc<StateStore>,
    stop: Arc<AtomicBool>,
}

impl SocketSource {
    /// 노드 선언에서 소켓 소스를 구성합니다. 바인드는 여기서 일어나므로
    /// 주소 충돌은 그래프 구성 단계에서 드러납니다.
    pub fn from_decl(decl: &NodeDecl, ctx: &BuildContext) -> Result<Self, NodeError> {
        let params: SocketSourceParams =
            decl.params
                .clone()
                .try_into()
                .map_err(|err: toml::de::Error| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: err.to_string(),
                })?;

        let parsers = match &params.parser {
            Some(format) => {
                ParserSet::for_format(format).ok_or_else(|| NodeError::InvalidParams {
                    node: decl.name.clone(),
                    reason: format!("unknown parser format '{format}'"),
                })?
            }
            None => ParserSet::for_format("syslog_rfc3164").unwrap_or_default(),
        };

        let bind_error = |err: &io::Error| NodeError::Bind {
            node: decl.name.clone(),
            addr: params.bind_addr.clone(),
            reason: err.to_string(),
        };
        let listener = match params.protocol {
            SocketProtocol::Udp => {
                let socket = UdpSocket::bind(&params.bind_addr).map_err(|e| bind_error(&e))?;
                socket
                    .set_read_timeout(Some(READ_POLL_INTERVAL))
                    .map_err(|e| bind_error(&e))?;
                Listener::Udp(socket)
            }
            SocketProtocol::Tcp => {
                let listener = TcpListener::bind(&params.bind_addr).map_err(|e| bind_error(&e))?;
                listener.set_nonblocking(true).map_err(|e| bind_error(&e))?;
                Listener::Tcp(listener)
            }
        };
        let local_addr = match &listener {
            Listener::Udp(socket) => socket.local_addr(),
            Listener::Tcp(listener) => listener.local_addr(),
        }
        .map_err(|e| bind_error(&e))?;

        Ok(Self {
            name: decl.name.clone(),
            configured_outputs: decl.outputs.clone(),
            sinks: Mutex::new(Vec::new()),
            listener: Mutex::new(Some(listener)),
            local_addr,
            parsers: Arc::new(parsers),
            resume: ctx.resume && params.resume,
            state: Arc::clone(&ctx.state),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 실제로 바인드된 주소. 포트 0으로 선언했을 때 배정된 포트를
    /// 알 수 있습니다.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn catchup_threshold(&self) -> Option<NaiveDateTime> {
        if !self.resume {
            return None;
        }
        self.state
            .get(&self.name, "last_msg_ts")
            .and_then(|v| v.as_timestamp())
    }

    fn run_worker(&self) {
        let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            error!(node = %self.name, "source started twice, worker not running");
            return;
        };

        let sinks: Vec<NamedSink> = self
            .sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if sinks.is_empty() {
            warn!(node = %self.name, "source has no connected outputs");
        }

        let mut broadcaster = Broadcaster::new(
            self.name.clone(),
            Arc::clone(&self.parsers),
            sinks,
            CatchupFilter::new(self.catchup_threshold()),
            Arc::clone(&self.state),
        );

        info!(
            node = %self.name,
            addr = %self.local_addr,
            protocol = match listener {
                Listener::Udp(_) => "udp",
                Listener::Tcp(_) => "tcp",
            },
            outputs = broadcaster.sink_count(),
            catching_up = broadcaster.is_catching_up(),
            "socket worker started"
        );

        match listener {
            Listener::Udp(socket) => self.serve_udp(&socket, &mut broadcaster),
            Listener::Tcp(listener) => self.serve_tcp(&listener, &mut broadcaster),
        }

        info!(node = %self.name, "socket worker stopped");
    }

    fn serve_udp(&self, socket: &UdpSocket, broadcaster: &mut Broadcaster) {
        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_SIZE);
        while !self.stop.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => match std::str::from_utf8(&buf[..len]) {
                    Ok(text) => {
                        for line in text.split('\n') {
                            let line = line.trim_end_matches('\r');
                            if line.is_empty() {
                                continue;
                            }
                            broadcaster.handle_line(line);
                        }
                    }
                    Err(err) => {
                        warn!(node = %self.name, %peer, error = %err, "dropping non-utf8 datagram");
                    }
                },
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(err) => {
                    warn!(node = %self.name, error = %err, "udp receive failed");
                    std::thread::sleep(READ_POLL_INTERVAL);
                }
            }
        }
    }

    fn serve_tcp(&self, listener: &TcpListener, broadcaster: &mut Broadcaster) {
        while !self.stop.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(node = %self.name, %peer, "connection accepted");
                    if let Err(err) = self.serve_stream(stream, broadcaster) {
                        warn!(node = %self.name, %peer, error = %err, "connection error");
                    } else {
                        debug!(node = %self.name, %peer, "connection closed");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(READ_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!(node = %self.name, error = %err, "accept failed");
                    std::thread::sleep(READ_POLL_INTERVAL);
                }
            }
        }
    }

    /// 연결 하나를 닫힐 때까지 읽습니다.
    ///
    /// 읽기 타임아웃으로 돌아올 때 `buf`에 남은 라인 조각은 그대로
    /// 유지됩니다 -- 비우면 타임아웃 경계에 걸친 라인이 잘립니다.
    fn serve_stream(&self, stream: TcpStream, broadcaster: &mut Broadcaster) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_POLL_INTERVAL))?;
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    // 연결 종료. 개행 없이 남은 꼬리도 한 줄로 처리한다.
                    if !buf.is_empty() {
                        self.handle_raw_line(&buf, broadcaster);
                    }
                    return Ok(());
                }
                Ok(_) => {
                    if buf.ends_with(b"\n") {
                        self.handle_raw_line(&buf, broadcaster);
                        buf.clear();
                    }
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(err) => return Err(err),
            }
        }
    }

    fn handle_raw_line(&self, raw: &[u8], broadcaster: &mut Broadcaster) {
        match std::str::from_utf8(raw) {
            Ok(text) => {
                let line = text.trim_end_matches(['\r', '\n']);
                if !line.is_empty() {
                    broadcaster.handle_line(line);
                }
            }
            Err(err) => {
                warn!(node = %self.name, error = %err, "dropping non-utf8 line");
            }
        }
    }
}

impl Node for SocketSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &'static str {
        "syslog_socket"
    }

    fn configured_outputs(&self) -> Vec<String> {
        self.configured_outputs.clone()
    }

    fn connect_outputs(&self, outputs: Vec<NamedSink>) {
        *self.sinks.lock().unwrap_or_else(|e| e.into_inner()) = outputs;
    }

    fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let name = self.name.clone();
        match std::thread::Builder::new()
            .name(format!("source-{name}"))
            .spawn(move || self.run_worker())
        {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(node = %name, error = %err, "failed to spawn source worker");
                None
            }
        }
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
