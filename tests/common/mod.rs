//! Shared helpers for integration tests
//!
//! Echo upstreams (plain and TLS), a throwaway PKI and traffic capture.

#![allow(dead_code)]

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::ssl::{Ssl, SslAcceptor, SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tcpproxy::config::ProxyConfig;
use tcpproxy::proxy::TrafficLogger;
use tcpproxy::LogMode;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_openssl::SslStream;

/// Upper bound for anything a test waits on
pub const BOUND: Duration = Duration::from_secs(5);

/// Proxy configuration listening on an ephemeral loopback port
pub fn proxy_config(target: SocketAddr) -> ProxyConfig {
    ProxyConfig {
        listen: "127.0.0.1:0".to_string(),
        target: target.to_string(),
        ..ProxyConfig::default()
    }
}

/// Copy everything read back to the writer, then half-close. Returns bytes echoed.
async fn echo<S>(stream: S) -> u64
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let echoed = tokio::io::copy(&mut reader, &mut writer).await.unwrap_or(0);
    let _ = writer.shutdown().await;
    echoed
}

/// Plain TCP echo server
pub async fn echo_server() -> SocketAddr {
    echo_server_with_notice().await.0
}

/// Plain TCP echo server that reports the byte count of every connection once the
/// client side has closed
pub async fn echo_server_with_notice() -> (SocketAddr, mpsc::UnboundedReceiver<u64>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(echo(stream).await);
            });
        }
    });

    (addr, rx)
}

/// TLS echo server presenting the leaf certificate of `pki`
pub async fn tls_echo_server(pki: &TestPki) -> SocketAddr {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_certificate_chain_file(&pki.cert).unwrap();
    builder.set_private_key_file(&pki.key, SslFiletype::PEM).unwrap();
    let acceptor = Arc::new(builder.build());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = Arc::clone(&acceptor);
            tokio::spawn(async move {
                let ssl = Ssl::new(acceptor.context()).unwrap();
                let mut stream = SslStream::new(ssl, stream).unwrap();
                if Pin::new(&mut stream).accept().await.is_ok() {
                    echo(stream).await;
                }
            });
        }
    });

    addr
}

/// Connect with TLS, accepting any certificate
pub async fn tls_connect(addr: SocketAddr) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();

    let mut config = connector.configure().unwrap();
    config.set_verify_hostname(false);
    let ssl = config.into_ssl("localhost").unwrap();

    let tcp = TcpStream::connect(addr).await.unwrap();
    let mut stream = SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut stream).connect().await.unwrap();
    stream
}

/// Send `payload`, half-close, and return everything received until end-of-stream
pub async fn round_trip<S>(mut stream: S, payload: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(BOUND, stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    received
}

/// Traffic logger writing into memory, and the task collecting what it wrote
///
/// The task completes once every clone of the logger is gone.
pub fn capture_traffic(mode: LogMode) -> (TrafficLogger, JoinHandle<Vec<u8>>) {
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let logger = TrafficLogger::spawn(mode, writer, 1024);

    let collected = tokio::spawn(async move {
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out).await;
        out
    });

    (logger, collected)
}

/// Decode the byte columns of a hex dump
pub fn decode_hex_dump(dump: &str) -> Vec<u8> {
    dump.lines()
        .flat_map(|line| {
            let end = line.find('|').unwrap();
            let digits: String = line[10..end].split_whitespace().collect();
            hex::decode(digits).unwrap()
        })
        .collect()
}

/// A CA and a leaf for `localhost` / `127.0.0.1` signed by it, as PEM files
pub struct TestPki {
    pub dir: TempDir,
    pub ca_cert: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn new_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn common_name(cn: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    name.build()
}

fn random_serial() -> Asn1Integer {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    serial.to_asn1_integer().unwrap()
}

fn base_builder(subject: &X509Name, issuer: &X509Name, key: &PKey<Private>) -> X509Builder {
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder.set_serial_number(&random_serial()).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder
}

pub fn generate_pki() -> TestPki {
    let dir = tempfile::tempdir().unwrap();

    let ca_key = new_key();
    let ca_name = common_name("tcpproxy test CA");
    let mut ca = base_builder(&ca_name, &ca_name, &ca_key);
    ca.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    ca.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build().unwrap())
        .unwrap();
    ca.sign(&ca_key, MessageDigest::sha256()).unwrap();
    let ca: X509 = ca.build();

    let leaf_key = new_key();
    let mut leaf = base_builder(&common_name("localhost"), &ca_name, &leaf_key);
    leaf.append_extension(BasicConstraints::new().build().unwrap()).unwrap();
    leaf.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()
            .unwrap(),
    )
    .unwrap();
    leaf.append_extension(ExtendedKeyUsage::new().server_auth().build().unwrap())
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns("localhost")
        .ip("127.0.0.1")
        .build(&leaf.x509v3_context(Some(&ca), None))
        .unwrap();
    leaf.append_extension(san).unwrap();
    leaf.sign(&ca_key, MessageDigest::sha256()).unwrap();
    let leaf = leaf.build();

    let ca_cert = dir.path().join("ca.crt");
    let cert = dir.path().join("server.crt");
    let key = dir.path().join("server.key");
    std::fs::write(&ca_cert, ca.to_pem().unwrap()).unwrap();
    std::fs::write(&cert, leaf.to_pem().unwrap()).unwrap();
    std::fs::write(&key, leaf_key.private_key_to_pem_pkcs8().unwrap()).unwrap();

    TestPki {
        dir,
        ca_cert,
        cert,
        key,
    }
}
