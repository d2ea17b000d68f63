use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};

use crate::address::Address;
use crate::codec::{decode_unicode, encode_packed, encode_unicode, pad_packed, PackedDecoder};
use crate::config::{CallOptions, ClientConfig};
use crate::error::{ClientError, EngineError};
use crate::registry::{Connection, ConnectionRegistry};
use crate::tag::{upsert, BatchResponse, StringResponse, TagRequest, TagResult, TagValue};

// Upper bound on up-front buffer reservation for word expansions.
const PREALLOC_WORDS: usize = 960;

/// Tag-level client for one PLC endpoint.
///
/// PlcClient はタグ単位の読み書き要求をワード単位の基本操作列に変換します。
/// 接続は `ConnectionRegistry` から取得し、同じエンドポイントを使う他の
/// クライアントと共有されます。
///
/// Elementary operations inside one call run strictly in sequence with a
/// pause after each (`read_pacing` / `write_pacing`) so a single caller cannot
/// flood the PLC. Each elementary call is bounded by the call timeout.
///
/// Failure shapes:
/// - a flat `read`/`write` entry whose engine call failed is returned as a
///   `TagResult` carrying `error`; the call as a whole still succeeds;
/// - a timeout, a failure inside an array or string expansion, or a
///   connection failure aborts the whole call with `ClientError`.
pub struct PlcClient {
    config: ClientConfig,
    registry: ConnectionRegistry,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl PlcClient {
    /// Validate `config` and bind it to `registry`.
    pub fn new(config: ClientConfig, registry: ConnectionRegistry) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            config,
            registry,
            connection: Mutex::new(None),
        })
    }

    /// Like `new`, using the registry installed with
    /// `ConnectionRegistry::install_shared`.
    pub fn with_shared_registry(config: ClientConfig) -> Result<Self, ClientError> {
        let registry = ConnectionRegistry::shared()
            .ok_or_else(|| ClientError::Config("no shared ConnectionRegistry installed".into()))?;
        Self::new(config, registry.clone())
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn call_timeout(&self, options: CallOptions) -> Duration {
        options.timeout.unwrap_or_else(|| self.config.timeout())
    }

    /// Acquire the endpoint's connection and cache it on this client.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connection().await.map(|_| ())
    }

    /// Release the endpoint's connection and forget the cached one.
    pub async fn disconnect(&self) {
        let mut cached = self.connection.lock().await;
        self.registry
            .release(&self.config.host, self.config.port)
            .await;
        *cached = None;
    }

    /// Cached connection while it is live, otherwise a fresh acquisition.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            if conn.is_connected() {
                return Ok(Arc::clone(conn));
            }
        }
        let conn = self
            .registry
            .acquire(
                &self.config.host,
                self.config.port,
                &self.config.connect_options(),
            )
            .await
            .inspect_err(|e| log::error!("[PlcClient] Connection error: {e}"))?;
        *cached = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Read each tag in order.
    ///
    /// `count > 1` reads that many consecutive words starting at the tag
    /// name and fails the whole call if any of them fails.
    pub async fn read(
        &self,
        tags: &[TagRequest],
        options: CallOptions,
    ) -> Result<BatchResponse, ClientError> {
        let started = Instant::now();
        let call_timeout = self.call_timeout(options);
        let conn = self.connection().await?;

        let mut results = Vec::with_capacity(tags.len());
        for tag in tags {
            let result = if tag.is_array() {
                self.read_array(&conn, tag, call_timeout).await
            } else {
                let r = read_tag(&conn, &tag.name, call_timeout).await;
                sleep(self.config.read_pacing()).await;
                r
            };
            let result = result.inspect_err(|e| log::error!("[PlcClient] Read error: {e}"))?;
            upsert(&mut results, result);
        }
        Ok(BatchResponse::new(results, started.elapsed()))
    }

    async fn read_array(
        &self,
        conn: &Connection,
        tag: &TagRequest,
        call_timeout: Duration,
    ) -> Result<TagResult, ClientError> {
        let count = tag.count.unwrap_or(1);
        let start = Address::parse(&tag.name)?;
        start.last(count)?;
        let mut values = Vec::with_capacity(count.min(PREALLOC_WORDS));
        let mut elapsed = Duration::ZERO;
        for index in 0..count {
            let addr = start.offset(index)?.to_string();
            let r = read_tag(conn, &addr, call_timeout).await?;
            sleep(self.config.read_pacing()).await;
            elapsed += r.time_taken;
            values.push(expect_value(index, &addr, &r)?);
        }
        Ok(TagResult::values(tag.name.clone(), values, elapsed))
    }

    /// Write each tag in order on a connection opened for this call.
    ///
    /// Any existing connection to the endpoint is released first and the
    /// one used here is released afterwards, on success and on failure.
    pub async fn write(
        &self,
        tags: &[TagRequest],
        options: CallOptions,
    ) -> Result<BatchResponse, ClientError> {
        let started = Instant::now();
        let call_timeout = self.call_timeout(options);

        self.disconnect().await;
        let outcome = async {
            let conn = self.connection().await?;
            self.write_tags(&conn, tags, call_timeout).await
        }
        .await;
        self.disconnect().await;

        let results = outcome.inspect_err(|e| log::error!("[PlcClient] Write error: {e}"))?;
        Ok(BatchResponse::new(results, started.elapsed()))
    }

    async fn write_tags(
        &self,
        conn: &Connection,
        tags: &[TagRequest],
        call_timeout: Duration,
    ) -> Result<Vec<TagResult>, ClientError> {
        let mut results = Vec::with_capacity(tags.len());
        for tag in tags {
            let result = match &tag.value {
                Some(TagValue::Word(v)) => {
                    let r = write_tag(conn, &tag.name, *v, call_timeout).await?;
                    sleep(self.config.write_pacing()).await;
                    r
                }
                Some(TagValue::Words(vs)) => {
                    let (records, elapsed) = self
                        .write_words(conn, &Address::parse(&tag.name)?, vs, call_timeout)
                        .await?;
                    TagResult::values(tag.name.clone(), vs.clone(), elapsed).with_results(records)
                }
                None => {
                    return Err(ClientError::InvalidArgument(format!(
                        "tag {} has no value to write",
                        tag.name
                    )));
                }
            };
            upsert(&mut results, result);
        }
        Ok(results)
    }

    /// Write `words` to consecutive addresses from `start`, aborting on the
    /// first failed element.
    async fn write_words(
        &self,
        conn: &Connection,
        start: &Address,
        words: &[u16],
        call_timeout: Duration,
    ) -> Result<(Vec<TagResult>, Duration), ClientError> {
        if words.is_empty() {
            return Err(ClientError::InvalidArgument(format!(
                "nothing to write at {start}"
            )));
        }
        start.last(words.len())?;
        let mut records = Vec::with_capacity(words.len());
        let mut elapsed = Duration::ZERO;
        for (index, &word) in words.iter().enumerate() {
            let addr = start.offset(index)?.to_string();
            let r = write_tag(conn, &addr, word, call_timeout).await?;
            sleep(self.config.write_pacing()).await;
            if let Some(message) = r.error_message() {
                return Err(ClientError::ElementaryOperation {
                    index,
                    address: addr,
                    message: message.to_string(),
                });
            }
            elapsed += r.time_taken;
            records.push(r);
        }
        Ok((records, elapsed))
    }

    /// Read up to `word_count` words of packed 8-bit text (two characters per
    /// word, high byte first). Reading stops at the first NUL byte.
    pub async fn read_string(
        &self,
        address: &str,
        word_count: usize,
        options: CallOptions,
    ) -> Result<StringResponse, ClientError> {
        let started = Instant::now();
        let start = Address::parse(address)?;
        if word_count == 0 {
            return Err(ClientError::InvalidArgument("word count must be positive".into()));
        }
        start.last(word_count)?;
        let call_timeout = self.call_timeout(options);
        let conn = self.connection().await?;

        let mut decoder = PackedDecoder::new();
        let mut words_read = 0;
        for index in 0..word_count {
            let addr = start.offset(index)?.to_string();
            let r = read_tag(&conn, &addr, call_timeout).await?;
            sleep(self.config.read_pacing()).await;
            let word = expect_value(index, &addr, &r)?;
            words_read += 1;
            if !decoder.push(word) {
                break;
            }
        }
        Ok(StringResponse::new(
            address,
            decoder.finish(),
            words_read,
            started.elapsed(),
        ))
    }

    /// Write `text` as packed 8-bit characters, NUL padding odd lengths.
    pub async fn write_string(
        &self,
        address: &str,
        text: &str,
        options: CallOptions,
    ) -> Result<StringResponse, ClientError> {
        let started = Instant::now();
        let start = Address::parse(address)?;
        if text.is_empty() {
            return Err(ClientError::InvalidArgument("text must not be empty".into()));
        }
        let words = encode_packed(text)?;
        let call_timeout = self.call_timeout(options);
        let conn = self.connection().await?;

        let (records, _) = self
            .write_words(&conn, &start, &words, call_timeout)
            .await
            .inspect_err(|e| log::error!("[PlcClient] Write string error: {e}"))?;
        let mut resp = StringResponse::new(address, pad_packed(text), words.len(), started.elapsed());
        resp.results = Some(records);
        Ok(resp)
    }

    /// Read exactly `word_count` words as UTF-16 code units and strip
    /// trailing NULs.
    pub async fn read_unicode_string(
        &self,
        address: &str,
        word_count: usize,
        options: CallOptions,
    ) -> Result<StringResponse, ClientError> {
        let started = Instant::now();
        let start = Address::parse(address)?;
        if word_count == 0 {
            return Err(ClientError::InvalidArgument("word count must be positive".into()));
        }
        start.last(word_count)?;
        let call_timeout = self.call_timeout(options);
        let conn = self.connection().await?;

        let mut words = Vec::with_capacity(word_count.min(PREALLOC_WORDS));
        for index in 0..word_count {
            let addr = start.offset(index)?.to_string();
            let r = read_tag(&conn, &addr, call_timeout).await?;
            sleep(self.config.read_pacing()).await;
            words.push(expect_value(index, &addr, &r)?);
        }
        Ok(StringResponse::new(
            address,
            decode_unicode(&words),
            word_count,
            started.elapsed(),
        ))
    }

    /// Write `text` as one UTF-16 code unit per word.
    pub async fn write_unicode_string(
        &self,
        address: &str,
        text: &str,
        options: CallOptions,
    ) -> Result<StringResponse, ClientError> {
        let started = Instant::now();
        let start = Address::parse(address)?;
        if text.is_empty() {
            return Err(ClientError::InvalidArgument("text must not be empty".into()));
        }
        let words = encode_unicode(text);
        let call_timeout = self.call_timeout(options);
        let conn = self.connection().await?;

        let (records, _) = self
            .write_words(&conn, &start, &words, call_timeout)
            .await
            .inspect_err(|e| log::error!("[PlcClient] Write unicode string error: {e}"))?;
        let mut resp = StringResponse::new(address, text.to_string(), words.len(), started.elapsed());
        resp.results = Some(records);
        Ok(resp)
    }
}

impl std::fmt::Debug for PlcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcClient")
            .field("endpoint", &self.config.endpoint())
            .finish_non_exhaustive()
    }
}

/// Value of an elementary read inside an expansion; an engine error becomes
/// a hard failure naming the element.
fn expect_value(index: usize, address: &str, r: &TagResult) -> Result<u16, ClientError> {
    if let Some(message) = r.error_message() {
        return Err(ClientError::ElementaryOperation {
            index,
            address: address.to_string(),
            message: message.to_string(),
        });
    }
    r.single_value().ok_or_else(|| ClientError::ElementaryOperation {
        index,
        address: address.to_string(),
        message: "engine returned no value".into(),
    })
}

/// One elementary read raced against `call_timeout`. Engine errors come back
/// as an error record; only the timeout is an `Err`.
async fn read_tag(
    conn: &Connection,
    name: &str,
    call_timeout: Duration,
) -> Result<TagResult, ClientError> {
    let started = Instant::now();
    log::debug!("[PlcClient] read {name}");
    let reply = conn.read(name);
    let answer = timeout(call_timeout, reply)
        .await
        .map_err(|_| ClientError::ReadTimeout {
            tag: name.to_string(),
            timeout: call_timeout,
        })?
        .unwrap_or(Err(EngineError::NoReply));
    match answer {
        Ok(data) => Ok(TagResult::value(
            name,
            data.value,
            data.quality,
            started.elapsed(),
        )),
        Err(e) => {
            log::error!("[PlcClient] Error reading tag {name}: {e}");
            Ok(TagResult::error(name, e.to_string(), started.elapsed()))
        }
    }
}

/// One elementary write raced against `call_timeout`.
async fn write_tag(
    conn: &Connection,
    name: &str,
    value: u16,
    call_timeout: Duration,
) -> Result<TagResult, ClientError> {
    let started = Instant::now();
    log::debug!("[PlcClient] write {name} = {value}");
    let reply = conn.write(name, value);
    let answer = timeout(call_timeout, reply)
        .await
        .map_err(|_| ClientError::WriteTimeout {
            tag: name.to_string(),
            timeout: call_timeout,
        })?
        .unwrap_or(Err(EngineError::NoReply));
    match answer {
        Ok(()) => Ok(TagResult::value(name, value, None, started.elapsed())),
        Err(e) => {
            log::error!("[PlcClient] Error writing tag {name}: {e}");
            Ok(TagResult::error(name, e.to_string(), started.elapsed()))
        }
    }
}
