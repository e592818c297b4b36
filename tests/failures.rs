mod common;

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{
    FlakyServer, TestServer, closed_port_url, config, errors, file_bytes, shared_source, source,
    wait_until,
};
use httpsrc::{
    ErrorCategory, FlowError, PushSource, Query, QueryResponse, UriInfo,
    source::{AuthChallenge, AuthHook, Credentials, SessionProvider, SessionRegistry},
};
use parking_lot::Mutex;
use rstest::rstest;

#[test]
fn resets_exhaust_retries_with_one_error() {
    let server = FlakyServer::start(usize::MAX, b"never");
    let mut cfg = config(server.url());
    cfg.retries = 2;
    let (src, rx) = source(cfg);
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    assert_eq!(server.connections(), 3);

    let errors = errors(&rx);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::Read);
}

#[test]
fn successful_read_resets_retry_count() {
    let server = FlakyServer::start(2, b"hello");
    let mut cfg = config(server.url());
    cfg.retries = 2;
    let (src, rx) = source(cfg);
    src.start().unwrap();

    let buffer = src.create().unwrap();
    assert_eq!(buffer.data.as_ref(), b"hello");
    assert_eq!(src.retry_count(), 0);
    assert_eq!(server.connections(), 3);
    assert!(errors(&rx).is_empty());
}

#[test]
fn unlimited_retries_outlast_failures() {
    let server = FlakyServer::start(6, b"finally");
    let mut cfg = config(server.url());
    cfg.retries = -1;
    let (src, _rx) = source(cfg);
    src.start().unwrap();

    assert_eq!(src.create().unwrap().data.as_ref(), b"finally");
    assert_eq!(server.connections(), 7);
}

#[test]
fn seekability_check_waits_out_a_retry_backoff() {
    let server = FlakyServer::stalling(1);
    let mut cfg = config(server.url());
    cfg.retries = 5;
    cfg.retry_backoff_ms = 500;
    cfg.timeout = 0;
    let (src, _rx) = source(cfg);
    let src = Arc::new(src);
    src.start().unwrap();

    let producer = {
        let src = src.clone();
        thread::spawn(move || src.create())
    };
    wait_until("the first attempt", || server.connections() == 1);
    thread::sleep(Duration::from_millis(150));

    // Lands in the middle of the backoff.
    let control = {
        let src = src.clone();
        thread::spawn(move || src.is_seekable())
    };
    wait_until("the second attempt", || server.connections() == 2);
    thread::sleep(Duration::from_millis(100));
    assert!(!control.is_finished());

    let unlocked_at = Instant::now();
    src.unlock();
    assert_eq!(producer.join().unwrap(), Err(FlowError::Flushing));
    control.join().unwrap();
    assert!(unlocked_at.elapsed() < Duration::from_secs(2));

    let lines = server.request_lines();
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines.iter().all(|l| l.starts_with("GET ")), "{lines:?}");
}

#[test]
fn server_reason_phrase_is_reported() {
    let server =
        FlakyServer::raw("HTTP/1.1 404 Gone Fishing\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    let (src, rx) = source(config(server.url()));
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    let errors = errors(&rx);
    assert_eq!(errors[0].category, ErrorCategory::NotFound);
    assert!(errors[0].debug.contains("404 Gone Fishing"), "{}", errors[0].debug);
}

#[test]
fn connection_refused_is_not_retried() {
    let (src, rx) = source(config(&closed_port_url()));
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    let errors = errors(&rx);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::OpenRead);
    assert_eq!(src.retry_count(), 1);
}

#[rstest]
#[case::not_found("/missing", ErrorCategory::NotFound, 404)]
#[case::unauthorized("/protected", ErrorCategory::NotAuthorized, 401)]
fn http_errors_are_reported_once(
    #[case] path: &str,
    #[case] category: ErrorCategory,
    #[case] status: u16,
) {
    let server = TestServer::start();
    let (src, rx) = source(config(&server.url(path)));
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    let errors = errors(&rx);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, category);
    assert_eq!(errors[0].status_code, Some(status));
    assert!(errors[0].debug.contains(path), "{}", errors[0].debug);
    assert_eq!(server.requests_to(path).len(), 1);
}

#[test]
fn configured_credentials_answer_the_challenge_once() {
    let server = TestServer::start();
    let mut cfg = config(&server.url("/protected"));
    cfg.user_id = Some("user".into());
    cfg.user_pw = Some("pass".into());
    let (src, _rx) = source(cfg);
    src.start().unwrap();

    assert_eq!(src.create().unwrap().data.as_ref(), b"secret");
    let requests = server.requests_to("/protected");
    assert_eq!(requests.len(), 2);
    assert!(requests[0].header("authorization").is_none());
    assert_eq!(
        requests[1].header("authorization"),
        Some("Basic dXNlcjpwYXNz")
    );
}

#[test]
fn wrong_credentials_are_not_retried() {
    let server = TestServer::start();
    let mut cfg = config(&server.url("/protected"));
    cfg.user_id = Some("user".into());
    cfg.user_pw = Some("wrong".into());
    let (src, rx) = source(cfg);
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    assert_eq!(server.requests_to("/protected").len(), 2);
    assert_eq!(errors(&rx)[0].category, ErrorCategory::NotAuthorized);
}

#[derive(Default)]
struct RecordingHook {
    seen: Mutex<Vec<(bool, Option<String>)>>,
}

impl AuthHook for RecordingHook {
    fn authenticate(&self, challenge: &AuthChallenge<'_>) -> Option<Credentials> {
        self.seen
            .lock()
            .push((challenge.retrying, challenge.realm.clone()));
        (!challenge.retrying).then(|| Credentials::new("user", "pass"))
    }
}

#[test]
fn auth_hook_sees_the_challenge() {
    let server = TestServer::start();
    let hook = Arc::new(RecordingHook::default());
    let (tx, _rx) = flume::unbounded();
    let src = httpsrc::HttpSrc::builder(config(&server.url("/protected")))
        .event_sink(Arc::new(tx))
        .auth_hook(hook.clone())
        .build()
        .unwrap();
    src.start().unwrap();

    assert_eq!(src.create().unwrap().data.as_ref(), b"secret");
    assert_eq!(*hook.seen.lock(), [(false, Some("test".to_string()))]);
}

#[rstest]
#[case::permanent("/moved", true)]
#[case::temporary("/found", false)]
fn redirects_are_followed_and_reported(#[case] path: &str, #[case] permanent: bool) {
    let server = TestServer::start();
    let (src, _rx) = source(config(&server.url(path)));
    src.start().unwrap();

    let mut data = Vec::new();
    while let Ok(buffer) = src.create() {
        data.extend_from_slice(&buffer.data);
    }
    assert_eq!(data, file_bytes());

    assert_eq!(
        src.query(Query::Uri),
        Some(QueryResponse::Uri(UriInfo {
            uri: server.url(path),
            redirect_uri: Some(server.url("/file")),
            permanent,
        }))
    );
}

#[test]
fn redirects_can_be_disabled() {
    let server = TestServer::start();
    let mut cfg = config(&server.url("/found"));
    cfg.automatic_redirect = false;
    let (src, rx) = source(cfg);
    src.start().unwrap();

    assert_eq!(src.create(), Err(FlowError::Error));
    let errors = errors(&rx);
    assert_eq!(errors[0].category, ErrorCategory::Read);
    assert_eq!(errors[0].status_code, Some(302));
    assert!(server.requests_to("/file").is_empty());
}

#[test]
fn default_sources_share_a_cookie_jar() {
    let server = TestServer::start();
    let registry: Arc<dyn SessionProvider> = Arc::new(SessionRegistry::new());

    let (first, _rx1) = shared_source(config(&server.url("/set-cookie")), registry.clone());
    let (second, _rx2) = shared_source(config(&server.url("/file")), registry.clone());
    let mut private_cfg = config(&server.url("/file"));
    private_cfg.timeout = 5;
    let (private, _rx3) = shared_source(private_cfg, registry.clone());

    first.start().unwrap();
    second.start().unwrap();
    private.start().unwrap();

    first.create().unwrap();
    second.create().unwrap();
    private.create().unwrap();

    let requests = server.requests_to("/file");
    assert_eq!(requests[0].header("cookie"), Some("token=abc"));
    assert!(requests[1].header("cookie").is_none());

    for src in [&first, &second, &private] {
        src.stop().unwrap();
    }
}
