//! SASL over the wire: PLAIN, SCRAM-SHA-256, aborts and error numerics.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::{TestClient, TestServer};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use murmurd::sasl::derive_credential;
use murmurd::setup::hash_password;

fn b64(data: &[u8]) -> String {
    BASE64.encode(data)
}

#[tokio::test]
async fn plain_success() {
    let server = TestServer::spawn().await;
    server
        .server
        .db
        .upsert_plain("alice", &hash_password("pass").unwrap())
        .await
        .unwrap();

    let mut c = TestClient::connect(server.addr).await;
    c.send("CAP LS 302").await;
    c.recv_containing("CAP * LS").await;
    c.send("CAP REQ :sasl").await;
    c.recv_containing("ACK").await;

    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;

    c.send(&format!("AUTHENTICATE {}", b64(b"\0alice\0pass"))).await;
    c.recv_numeric("900").await;
    let success = c.recv_numeric("903").await;
    assert!(success.contains("SASL authentication successful"));

    c.send("CAP END").await;
    c.send("NICK alice").await;
    c.send("USER alice 0 * :Alice").await;
    c.recv_numeric("001").await;

    server.shutdown().await;
}

#[tokio::test]
async fn plain_wrong_password_fails() {
    let server = TestServer::spawn().await;
    server
        .server
        .db
        .upsert_plain("alice", &hash_password("pass").unwrap())
        .await
        .unwrap();

    let mut c = TestClient::connect(server.addr).await;
    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;
    c.send(&format!("AUTHENTICATE {}", b64(b"\0alice\0wrong"))).await;
    c.recv_numeric("904").await;

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_mechanism_lists_mechs() {
    let server = TestServer::spawn().await;
    let mut c = TestClient::connect(server.addr).await;

    c.send("AUTHENTICATE GSSAPI").await;
    let mechs = c.recv_numeric("908").await;
    assert!(mechs.contains("PLAIN,EXTERNAL,SCRAM-SHA-256"));

    server.shutdown().await;
}

#[tokio::test]
async fn abort_with_star() {
    let server = TestServer::spawn().await;
    let mut c = TestClient::connect(server.addr).await;

    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;
    c.send("AUTHENTICATE *").await;
    let aborted = c.recv_numeric("906").await;
    assert!(aborted.contains("aborted"));

    server.shutdown().await;
}

#[tokio::test]
async fn reauthentication_rejected() {
    let server = TestServer::spawn().await;
    server
        .server
        .db
        .upsert_plain("alice", &hash_password("pass").unwrap())
        .await
        .unwrap();

    let mut c = TestClient::connect(server.addr).await;
    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;
    c.send(&format!("AUTHENTICATE {}", b64(b"\0alice\0pass"))).await;
    c.recv_numeric("903").await;

    c.send("AUTHENTICATE PLAIN").await;
    c.recv_numeric("907").await;

    server.shutdown().await;
}

#[tokio::test]
async fn bad_base64_fails_cleanly() {
    let server = TestServer::spawn().await;
    let mut c = TestClient::connect(server.addr).await;

    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;
    c.send("AUTHENTICATE !!!notbase64!!!").await;
    c.recv_numeric("904").await;

    server.shutdown().await;
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[tokio::test]
async fn scram_sha256_full_exchange() {
    let server = TestServer::spawn().await;
    let salt = b"scram-test-salt";
    server
        .server
        .db
        .upsert_scram("carol", &derive_credential("pencil", salt, 4096))
        .await
        .unwrap();

    let mut c = TestClient::connect(server.addr).await;
    c.send("AUTHENTICATE SCRAM-SHA-256").await;
    c.recv_containing("AUTHENTICATE +").await;

    let client_nonce = "fyko+d2lbbFgONRv9qkxdawL";
    let client_first_bare = format!("n=carol,r={client_nonce}");
    c.send(&format!(
        "AUTHENTICATE {}",
        b64(format!("n,,{client_first_bare}").as_bytes())
    ))
    .await;

    // server-first: r=<combined>,s=<salt>,i=<iterations>
    let challenge_line = c.recv_containing("AUTHENTICATE").await;
    let encoded = challenge_line.strip_prefix("AUTHENTICATE ").unwrap();
    let server_first = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();

    let mut combined_nonce = None;
    let mut got_salt = None;
    let mut iterations = None;
    for attr in server_first.split(',') {
        if let Some(v) = attr.strip_prefix("r=") {
            combined_nonce = Some(v.to_string());
        } else if let Some(v) = attr.strip_prefix("s=") {
            got_salt = Some(BASE64.decode(v).unwrap());
        } else if let Some(v) = attr.strip_prefix("i=") {
            iterations = Some(v.parse::<u32>().unwrap());
        }
    }
    let combined_nonce = combined_nonce.unwrap();
    assert!(combined_nonce.starts_with(client_nonce));
    assert_eq!(got_salt.as_deref(), Some(salt.as_slice()));
    assert_eq!(iterations, Some(4096));

    // client-final with the proof
    let without_proof = format!("c=biws,r={combined_nonce}");
    let auth_message = format!("{client_first_bare},{server_first},{without_proof}");

    let mut salted = [0u8; 32];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(b"pencil", salt, 4096, &mut salted).unwrap();
    let client_key = hmac_sha256(&salted, b"Client Key");
    let stored_key: [u8; 32] = Sha256::digest(client_key).into();
    let signature = hmac_sha256(&stored_key, auth_message.as_bytes());
    let proof: Vec<u8> = client_key
        .iter()
        .zip(signature.iter())
        .map(|(k, s)| k ^ s)
        .collect();

    c.send(&format!(
        "AUTHENTICATE {}",
        b64(format!("{without_proof},p={}", b64(&proof)).as_bytes())
    ))
    .await;

    // server-final carries the verifier, then the success numerics
    let final_line = c.recv_containing("AUTHENTICATE").await;
    let encoded = final_line.strip_prefix("AUTHENTICATE ").unwrap();
    let server_final = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
    let server_key = hmac_sha256(&salted, b"Server Key");
    let expected_sig = hmac_sha256(&server_key, auth_message.as_bytes());
    assert_eq!(server_final, format!("v={}", b64(&expected_sig)));

    let logged_in = c.recv_numeric("900").await;
    assert!(logged_in.contains("carol"));
    c.recv_numeric("903").await;

    server.shutdown().await;
}

#[tokio::test]
async fn scram_bad_proof_is_invalid_proof() {
    let server = TestServer::spawn().await;
    let salt = b"scram-test-salt";
    server
        .server
        .db
        .upsert_scram("carol", &derive_credential("pencil", salt, 4096))
        .await
        .unwrap();

    let mut c = TestClient::connect(server.addr).await;
    c.send("AUTHENTICATE SCRAM-SHA-256").await;
    c.recv_containing("AUTHENTICATE +").await;
    c.send(&format!("AUTHENTICATE {}", b64(b"n,,n=carol,r=abcdef"))).await;

    let challenge_line = c.recv_containing("AUTHENTICATE").await;
    let encoded = challenge_line.strip_prefix("AUTHENTICATE ").unwrap();
    let server_first = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
    let combined_nonce = server_first
        .split(',')
        .next()
        .unwrap()
        .strip_prefix("r=")
        .unwrap();

    // garbage proof of the right length
    c.send(&format!(
        "AUTHENTICATE {}",
        b64(format!("c=biws,r={combined_nonce},p={}", b64(&[0u8; 32])).as_bytes())
    ))
    .await;

    let fail = c.recv_numeric("904").await;
    assert!(fail.contains("e=invalid-proof"));

    server.shutdown().await;
}

#[tokio::test]
async fn registration_aborts_pending_sasl() {
    let server = TestServer::spawn().await;
    let mut c = TestClient::connect(server.addr).await;

    c.send("AUTHENTICATE PLAIN").await;
    c.recv_containing("AUTHENTICATE +").await;

    // registering mid-exchange abandons it
    c.send("NICK dave").await;
    c.send("USER dave 0 * :Dave").await;
    c.recv_numeric("906").await;
    c.recv_numeric("001").await;

    server.shutdown().await;
}
