#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph
)]

//! melsec_tags
//!
//! melsec_tags は Mitsubishi PLC のタグ (D100 などのワードデバイス) を読み書きするための
//! 高レベルなクライアントと、エンドポイントごとに 1 本の接続を共有する接続レジストリを
//! 提供する Rust ライブラリです。
//!
//! 主な機能:
//! - `ConnectionRegistry`: (host, port) ごとの接続共有、同時接続要求の集約、状態管理
//! - `PlcClient`: read / write / 配列 / 8bit 文字列 / UTF-16 文字列の読み書き
//! - ワード列と文字列の変換 (`codec`) とアドレス演算 (`address`)
//!
//! The wire protocol itself is supplied by an implementation of
//! [`engine::ProtocolEngine`]; the workspace crate `melsec_tags_mock` provides
//! an in-memory one for tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use melsec_tags::{CallOptions, ClientConfig, ConnectionRegistry, PlcClient, TagRequest};
//! # fn engine() -> Arc<dyn melsec_tags::engine::ProtocolEngine> { unimplemented!() }
//! # async fn run() -> Result<(), melsec_tags::ClientError> {
//! let registry = ConnectionRegistry::new(engine);
//! let plc = PlcClient::new(ClientConfig::new("192.168.8.106", 1281), registry)?;
//! let _resp = plc.read(&[TagRequest::array("D3030", 20)], CallOptions::default()).await?;
//! plc.write_string("D3030", "(M1) APR010010", CallOptions::default()).await?;
//! plc.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod client;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod mc_define;
pub mod plc_series;
pub mod registry;
pub mod tag;
pub mod toml_helpers;

pub use client::PlcClient;
pub use config::{CallOptions, ClientConfig, ConnectOptions, EngineOptions, RegistryConfig};
pub use endpoint::{Endpoint, EndpointId};
pub use error::{ClientError, EngineError};
pub use registry::{Connection, ConnectionRegistry, ConnectionState};
pub use tag::{BatchResponse, StringResponse, TagOutcome, TagRequest, TagResult, TagValue};
