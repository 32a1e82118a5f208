use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::ports;
use crate::types::{HttpRequest, HttpResponse, NotificationDisplay};

pub(crate) fn datetime(raw: &str) -> OffsetDateTime {
    OffsetDateTime::parse(raw, &Rfc3339).expect("parse datetime")
}

/// Time source with a settable clock; `sleep` resolves immediately and
/// records the requested duration.
#[derive(Clone)]
pub(crate) struct TestTime {
    now: Arc<Mutex<OffsetDateTime>>,
    durations: Arc<Mutex<Vec<Duration>>>,
}

impl TestTime {
    pub(crate) fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            durations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().expect("now lock");
        *now += by;
    }

    pub(crate) fn sleep_durations(&self) -> Vec<Duration> {
        self.durations.lock().expect("durations lock").clone()
    }
}

impl ports::TimeProvider for TestTime {
    type Sleep<'a>
        = std::future::Ready<()>
    where
        Self: 'a;

    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("now lock")
    }

    fn sleep<'a>(&'a self, duration: Duration) -> Self::Sleep<'a> {
        self.durations
            .lock()
            .expect("durations lock")
            .push(duration);
        std::future::ready(())
    }
}

#[derive(Debug)]
pub(crate) struct ScriptError(pub(crate) String);

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scripted failure: {}", self.0)
    }
}

enum Script {
    Respond(HttpResponse),
    Fail,
}

/// HTTP fake: responses are scripted per (method, url fragment). The
/// first script whose fragment occurs in the request URL wins, so
/// register specific fragments before broad ones. Every executed
/// request is recorded for assertions.
#[derive(Clone, Default)]
pub(crate) struct ScriptedClient {
    scripts: Arc<Mutex<Vec<(String, String, Script)>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: &str, url_fragment: &str, response: HttpResponse) {
        self.scripts.lock().expect("scripts lock").push((
            method.to_string(),
            url_fragment.to_string(),
            Script::Respond(response),
        ));
    }

    pub(crate) fn respond_json(&self, method: &str, url_fragment: &str, value: serde_json::Value) {
        self.respond(method, url_fragment, ok_json(value));
    }

    pub(crate) fn fail(&self, method: &str, url_fragment: &str) {
        self.scripts.lock().expect("scripts lock").push((
            method.to_string(),
            url_fragment.to_string(),
            Script::Fail,
        ));
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn requests_to(&self, url_fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url.contains(url_fragment))
            .collect()
    }
}

impl ports::HttpClient for ScriptedClient {
    type Error = ScriptError;
    type Fut<'a>
        = std::future::Ready<Result<HttpResponse, ScriptError>>
    where
        Self: 'a;

    fn execute<'a>(&'a self, request: HttpRequest) -> Self::Fut<'a> {
        let result = {
            let scripts = self.scripts.lock().expect("scripts lock");
            match scripts.iter().find(|(method, fragment, _)| {
                method == request.method.as_str() && request.url.contains(fragment.as_str())
            }) {
                Some((_, _, Script::Respond(response))) => Ok(response.clone()),
                Some((_, _, Script::Fail)) => {
                    Err(ScriptError(format!("network unreachable: {}", request.url)))
                }
                None => Err(ScriptError(format!("no script for {}", request.url))),
            }
        };
        self.requests.lock().expect("requests lock").push(request);
        std::future::ready(result)
    }
}

pub(crate) fn ok_json(value: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some("application/json".to_string()),
        body: serde_json::to_vec(&value).expect("serialize fixture"),
    }
}

pub(crate) fn ok_bytes(body: &[u8], content_type: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
    }
}

pub(crate) fn status(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        content_type: None,
        body: Vec::new(),
    }
}

#[derive(Debug)]
pub(crate) struct TestNotifyError;

impl std::fmt::Display for TestNotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("test notify error")
    }
}

#[derive(Clone, Default)]
pub(crate) struct TestNotifier {
    pub(crate) presented: Arc<Mutex<Vec<NotificationDisplay>>>,
    pub(crate) closed: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl TestNotifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next(&self) {
        *self.fail.lock().expect("fail lock") = true;
    }

    pub(crate) fn presented(&self) -> Vec<NotificationDisplay> {
        self.presented.lock().expect("presented lock").clone()
    }

    pub(crate) fn closed(&self) -> Vec<String> {
        self.closed.lock().expect("closed lock").clone()
    }
}

impl ports::Notifier for TestNotifier {
    type Error = TestNotifyError;
    type Fut<'a>
        = std::future::Ready<Result<(), TestNotifyError>>
    where
        Self: 'a;

    fn present<'a>(&'a self, display: &'a NotificationDisplay) -> Self::Fut<'a> {
        let mut fail = self.fail.lock().expect("fail lock");
        if *fail {
            *fail = false;
            return std::future::ready(Err(TestNotifyError));
        }
        self.presented
            .lock()
            .expect("presented lock")
            .push(display.clone());
        std::future::ready(Ok(()))
    }

    fn close<'a>(&'a self, tag: &'a str) -> Self::Fut<'a> {
        self.closed.lock().expect("closed lock").push(tag.to_string());
        std::future::ready(Ok(()))
    }
}

#[derive(Clone, Default)]
pub(crate) struct TestReporter {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl TestReporter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<(String, String)> {
        self.events.lock().expect("events lock").clone()
    }
}

impl ports::Reporter for TestReporter {
    fn report(&self, context: &str, error: &dyn std::fmt::Display) {
        self.events
            .lock()
            .expect("events lock")
            .push((context.to_string(), error.to_string()));
    }
}
