//! 회전을 견디는 파일 테일링
//!
//! [`FileTail`]은 로그 파일에서 라인을 읽어 올리는 저수준 반복자입니다.
//! 파일 회전(truncate, 이름 교체)과 strftime 날짜 템플릿 경로를 감지해
//! 스스로 다시 열고, 읽기 오프셋을 상태 저장소에 남겨 재시작 후 이어읽기를
//! 지원합니다.
//!
//! # 상태 키
//! - `file_pos`: 마지막으로 기록한 바이트 오프셋
//! - `inode_nr`: 오프셋이 유효한 파일의 inode 번호
//!
//! 오프셋은 N 라인마다 플러시되므로 비정상 종료 시 최대 N 라인이
//! 다시 처리될 수 있습니다 (at-least-once).

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use tracing::{debug, info, warn};

use relaypost_core::NodeError;
use relaypost_core::metrics as m;

use crate::state::{StateStore, StateValue};

/// stop 플래그 관찰 주기. 긴 수면도 이 단위로 쪼개서 수행합니다.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 파일 테일 동작 설정
///
/// 경로 외의 값들은 `[pipeline]` 섹션의 전역 설정에서 내려옵니다.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// 감시 대상 경로. strftime 지시자를 포함할 수 있고 `-`는 stdin.
    pub path: String,
    /// EOF에서 깨끗하게 종료할지 (배치 처리와 테스트 용도)
    pub stop_on_eof: bool,
    /// 저장된 `file_pos`/`inode_nr`에서 이어읽기할지
    pub resume: bool,
    /// 몇 라인마다 오프셋을 플러시할지
    pub persist_every_lines: u32,
    /// 새 데이터가 없을 때의 유휴 대기
    pub idle_sleep: Duration,
    /// stat/open 실패 시의 백오프
    pub reopen_backoff: Duration,
}

/// 현재 열려 있는 입력 핸들
enum TailReader {
    /// stdin은 한 번만 바인딩되며 회전하지 않습니다.
    Stdin(BufReader<io::Stdin>),
    /// 일반 파일. offset은 수동으로 추적합니다 -- BufReader의 내부 위치는
    /// 미리 읽은 버퍼만큼 앞서 있어 신뢰할 수 없습니다.
    File { reader: BufReader<File>, offset: u64 },
}

/// 재열기 검사 결과
enum Reopen {
    /// 새 핸들을 열었음
    Opened,
    /// 기존 핸들을 유지함 (새 데이터 없음)
    Kept,
    /// 파일이 아직 없거나 열기에 실패함. 백오프는 이미 수행됨.
    NotYet,
}

/// 한 번의 원시 읽기 결과
enum RawRead {
    Line(Vec<u8>),
    Eof,
    Failed(io::Error),
}

/// 회전과 재시작을 견디는 라인 단위 파일 테일러
///
/// [`FileTail::next_line`]이 블로킹으로 다음 라인을 반환합니다. `None`은
/// stop 플래그가 올라갔거나 `stop_on_eof` 종료를 뜻합니다. 내부의 모든
/// 대기 루프는 stop 플래그를 관찰하므로 취소 지연은 수면 조각 하나로
/// 제한됩니다.
pub struct FileTail {
    config: TailConfig,
    node_name: String,
    state: Arc<StateStore>,
    stop: Arc<AtomicBool>,
    reader: Option<TailReader>,
    last_size: Option<u64>,
    lines_since_persist: u32,
}

impl FileTail {
    /// 새 테일러를 생성합니다.
    ///
    /// 경로의 strftime 템플릿은 이 시점에 검증합니다. 잘못된 지시자를
    /// 런타임 확장까지 끌고 가면 chrono 포매터가 panic하기 때문입니다.
    pub fn new(
        config: TailConfig,
        node_name: impl Into<String>,
        state: Arc<StateStore>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, NodeError> {
        let node_name = node_name.into();

        if config.path != "-" && !strftime_template_is_valid(&config.path) {
            return Err(NodeError::InvalidParams {
                node: node_name,
                reason: format!("invalid strftime path template '{}'", config.path),
            });
        }

        Ok(Self {
            config,
            node_name,
            state,
            stop,
            reader: None,
            last_size: None,
            lines_since_persist: 0,
        })
    }

    /// 현재 확장된 감시 대상 경로
    pub fn current_path(&self) -> String {
        expand_path(&self.config.path)
    }

    /// 다음 라인을 블로킹으로 반환합니다.
    ///
    /// 반환되는 라인에는 개행이 없습니다. UTF-8이 아닌 라인은 오프셋만
    /// 전진시키고 조용히 버립니다. `None`은 종료를 뜻합니다.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.record_position();
                return None;
            }

            if self.reader.is_none() {
                match self.maybe_reopen() {
                    Reopen::Opened => {}
                    Reopen::Kept | Reopen::NotYet => continue,
                }
            }

            match self.read_raw_line() {
                RawRead::Line(bytes) => {
                    self.lines_since_persist += 1;
                    if self.lines_since_persist >= self.config.persist_every_lines.max(1) {
                        self.persist_position();
                        self.lines_since_persist = 0;
                    }

                    match String::from_utf8(bytes) {
                        Ok(mut line) => {
                            while line.ends_with('\n') || line.ends_with('\r') {
                                line.pop();
                            }
                            return Some(line);
                        }
                        Err(_) => continue,
                    }
                }
                RawRead::Eof => {
                    if self.config.stop_on_eof {
                        info!(node = %self.node_name, "EOF seen on input, tail stopped");
                        self.record_position();
                        return None;
                    }

                    match self.maybe_reopen() {
                        Reopen::Opened => {}
                        Reopen::Kept => {
                            debug!(
                                node = %self.node_name,
                                last_size = ?self.last_size,
                                "no new data"
                            );
                            self.sleep_observing_stop(self.config.idle_sleep);
                        }
                        Reopen::NotYet => {}
                    }
                }
                RawRead::Failed(err) => {
                    warn!(node = %self.node_name, error = %err, "read failed, closing handle");
                    self.reader = None;
                    self.last_size = None;
                }
            }
        }
    }

    /// 감시 대상을 다시 열어야 하는지 검사하고 필요하면 엽니다.
    ///
    /// 템플릿 경로는 매 검사마다 다시 확장되므로 날짜가 바뀌면 자연히
    /// 새 파일을 가리킵니다. 기존 핸들은 파일 크기가 줄지 않은 동안만
    /// 유지됩니다.
    fn maybe_reopen(&mut self) -> Reopen {
        if self.config.path == "-" {
            if self.reader.is_none() {
                self.reader = Some(TailReader::Stdin(BufReader::new(io::stdin())));
                return Reopen::Opened;
            }
            return Reopen::Kept;
        }

        let path = expand_path(&self.config.path);

        let cur_size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    // 회전 후 원격 파일시스템의 속성 캐시가 어긋나 ENOENT가
                    // 아닌 오류가 이어지는 경우가 있다. 부모 디렉토리 목록
                    // 조회가 캐시를 갱신한다.
                    nudge_parent_directory(Path::new(&path));
                }
                debug!(node = %self.node_name, path, error = %err, "stat failed, waiting for file");
                self.last_size = None;
                self.sleep_observing_stop(self.config.reopen_backoff);
                return Reopen::NotYet;
            }
        };

        if self.reader.is_some() {
            if let Some(last) = self.last_size {
                if cur_size >= last {
                    self.last_size = Some(cur_size);
                    return Reopen::Kept;
                }
            }
        }
        self.last_size = Some(cur_size);

        info!(node = %self.node_name, path, "reopening file");
        self.reader = None;

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(node = %self.node_name, path, error = %err, "open failed");
                self.sleep_observing_stop(self.config.reopen_backoff);
                return Reopen::NotYet;
            }
        };

        let offset = match self.position_after_open(&file) {
            Ok(offset) => offset,
            Err(err) => {
                warn!(node = %self.node_name, path, error = %err, "fstat failed");
                self.sleep_observing_stop(self.config.reopen_backoff);
                return Reopen::NotYet;
            }
        };

        if offset > 0 {
            if let Err(err) = file.seek(SeekFrom::Start(offset)) {
                warn!(node = %self.node_name, path, error = %err, "seek failed");
                self.sleep_observing_stop(self.config.reopen_backoff);
                return Reopen::NotYet;
            }
            info!(node = %self.node_name, path, offset, "resuming from saved position");
        }

        self.reader = Some(TailReader::File {
            reader: BufReader::new(file),
            offset,
        });
        self.lines_since_persist = 0;
        self.persist_position();
        metrics::counter!(m::SOURCE_REOPENS_TOTAL, m::LABEL_NODE => self.node_name.clone())
            .increment(1);

        Reopen::Opened
    }

    /// 새로 연 파일에서 읽기를 시작할 오프셋을 결정합니다.
    ///
    /// 저장된 inode가 현재 파일과 같고 저장된 오프셋이 파일 크기보다
    /// 작을 때만 이어읽습니다. 그 외에는 처음부터 읽습니다. inode는
    /// resume 여부와 무관하게 항상 갱신합니다.
    fn position_after_open(&self, file: &File) -> io::Result<u64> {
        use std::os::unix::fs::MetadataExt;

        let meta = file.metadata()?;
        let inode = meta.ino();
        let size = meta.len();

        let mut offset = 0u64;
        if self.config.resume {
            let saved_inode = self
                .state
                .get(&self.node_name, "inode_nr")
                .and_then(|v| v.as_u64());
            let saved_pos = self
                .state
                .get(&self.node_name, "file_pos")
                .and_then(|v| v.as_u64());

            if let (Some(saved_inode), Some(saved_pos)) = (saved_inode, saved_pos) {
                if saved_inode == inode && saved_pos < size {
                    offset = saved_pos;
                }
            }
        }

        self.state
            .set(&self.node_name, "inode_nr", StateValue::from(inode));
        Ok(offset)
    }

    /// 현재 오프셋을 메모리 상태에만 기록합니다 (플러시 없음).
    ///
    /// 깨끗한 종료 경로에서 호출되어, 이후의 전체 플러시가 정확한
    /// 위치를 내보내게 합니다.
    fn record_position(&self) {
        if let Some(TailReader::File { offset, .. }) = &self.reader {
            self.state
                .set(&self.node_name, "file_pos", StateValue::from(*offset));
        }
    }

    /// 현재 오프셋을 기록하고 상태 저장소를 플러시합니다.
    fn persist_position(&self) {
        if let Some(TailReader::File { offset, .. }) = &self.reader {
            self.state
                .set(&self.node_name, "file_pos", StateValue::from(*offset));
            if let Err(err) = self.state.flush() {
                warn!(node = %self.node_name, error = %err, "state flush failed");
            }
        }
    }

    /// 개행까지의 원시 바이트를 읽습니다. 오프셋이 함께 전진합니다.
    fn read_raw_line(&mut self) -> RawRead {
        let mut buf = Vec::new();
        match &mut self.reader {
            Some(TailReader::File { reader, offset }) => {
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => RawRead::Eof,
                    Ok(n) => {
                        *offset += n as u64;
                        RawRead::Line(buf)
                    }
                    Err(err) => RawRead::Failed(err),
                }
            }
            Some(TailReader::Stdin(reader)) => match reader.read_until(b'\n', &mut buf) {
                Ok(0) => RawRead::Eof,
                Ok(_) => RawRead::Line(buf),
                Err(err) => RawRead::Failed(err),
            },
            None => RawRead::Eof,
        }
    }

    /// stop 플래그를 관찰하면서 주어진 시간만큼 수면합니다.
    fn sleep_observing_stop(&self, total: Duration) {
        let mut remaining = total;
        while !remaining.is_zero() && !self.stop.load(Ordering::Relaxed) {
            let step = remaining.min(STOP_POLL_INTERVAL);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// strftime 템플릿이 유효한지 검사합니다.
///
/// chrono는 잘못된 지시자를 `Item::Error`로 파싱하고, 그대로 포매팅하면
/// panic합니다. 리터럴 `%`는 `%%`로 써야 합니다.
fn strftime_template_is_valid(template: &str) -> bool {
    StrftimeItems::new(template).all(|item| !matches!(item, Item::Error))
}

/// 템플릿 경로를 현재 시각으로 확장합니다.
fn expand_path(template: &str) -> String {
    Local::now().format(template).to_string()
}

/// 부모 디렉토리를 한 번 나열해 원격 파일시스템 캐시 갱신을 유도합니다.
fn nudge_parent_directory(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    if let Ok(entries) = fs::read_dir(parent) {
        for _ in entries.flatten() {}
    }
}
