//! 출력 노드
//!
//! 그래프의 말단에서 레코드를 소비하는 노드들입니다. 모두
//! [`RecordSink`](relaypost_core::RecordSink)를 구현하며, 업스트림 워커
//! 스레드에서 동기적으로 호출되므로 내부 상태는 뮤텍스로 보호합니다.
//!
//! 쓰기 실패는 기록하고 레코드를 버립니다 -- 출력이 소스를 영구히
//! 막지 않습니다.

mod console;
mod file;
mod memory;

pub use console::ConsoleOutput;
pub use file::FileOutput;
pub use memory::MemoryOutput;
