// In-memory Backend used by the adapter and bootstrap tests

use crate::db::connection::ConnectionError;
use crate::db::traits::{Backend, BackendError, CellValue, Record};
use crate::db::translate::TranslatedStatement;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted response for the next `run` call
pub enum Reply {
    Rows(Vec<Record>),
    Server { code: u32, message: String },
    Delay(Duration),
}

impl Reply {
    /// What SQL Server returns for `OUTPUT INSERTED.id`
    pub fn identity(id: i64) -> Self {
        Reply::Rows(vec![Record::new().with("id", CellValue::Int(id))])
    }

    pub fn count(n: i64) -> Self {
        Reply::Rows(vec![Record::new().with("count", CellValue::Int(n))])
    }

    pub fn server_error(code: u32, message: &str) -> Self {
        Reply::Server {
            code,
            message: message.to_string(),
        }
    }
}

/// Records every statement it receives and answers from a reply queue.
/// An empty queue answers with no rows.
#[derive(Default)]
pub struct FakeBackend {
    replies: Mutex<VecDeque<Reply>>,
    statements: Mutex<Vec<TranslatedStatement>>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    connect_error: Mutex<Option<ConnectionError>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_connect(&self, err: ConnectionError) {
        *self.connect_error.lock().unwrap() = Some(err);
    }

    pub fn statements(&self) -> Vec<TranslatedStatement> {
        self.statements.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Backend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.connect_error.lock().unwrap().take() {
            return Err(err);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, statement: &TranslatedStatement) -> Result<Vec<Record>, BackendError> {
        self.statements.lock().unwrap().push(statement.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Server { code, message }) => Err(BackendError::Server { code, message }),
            Some(Reply::Delay(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(Vec::new())
            }
        }
    }
}
