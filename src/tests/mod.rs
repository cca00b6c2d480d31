use std::collections::BTreeSet;
use std::io::Cursor;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::pipeline::Transform;
use crate::probe::{ProbeClient, ProbeConfig, ProbeTarget, SkipReason, DEFAULT_USER_AGENT};
use crate::runner::{Options, Runner, StageWidths};
use crate::stages::{
    CharProber, Confirmer, Discoverer, Finding, ParamCandidate, DEFAULT_MARKER,
    DEFAULT_PAYLOAD_PREFIX, DEFAULT_PROBE_CHARS,
};

fn probe_config() -> ProbeConfig {
    ProbeConfig {
        timeout_seconds: 5,
        ..ProbeConfig::default()
    }
}

fn client() -> ProbeClient {
    ProbeClient::new(&probe_config()).unwrap()
}

fn runner(workers: usize) -> Runner {
    Runner::new(Options {
        concurrency: StageWidths::uniform(workers),
        probe: probe_config(),
        ..Options::default()
    })
    .unwrap()
}

fn target(server: &MockServer, path_and_query: &str) -> ProbeTarget {
    ProbeTarget::parse(&format!("{}{}", server.uri(), path_and_query)).unwrap()
}

fn candidate(server: &MockServer, path_and_query: &str, param: &str) -> ParamCandidate {
    ParamCandidate {
        url: target(server, path_and_query),
        param: param.to_string(),
    }
}

fn html_page(request: &Request, escape: fn(&str) -> String) -> String {
    let mut body = String::from("<html><body>");
    for (_, value) in request.url.query_pairs() {
        body.push_str("<p>");
        body.push_str(&escape(&value));
        body.push_str("</p>");
    }
    body.push_str("</body></html>");
    body
}

fn verbatim(value: &str) -> String {
    value.to_string()
}

// escapes every probe character except the double quote
fn escape_all_but_quote(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '\'' | '(' | ')' | '`' | ';' | '{' | '}' => format!("&#{};", c as u32),
            other => other.to_string(),
        })
        .collect()
}

async fn mount_html(server: &MockServer, route: &str, escape: fn(&str) -> String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(move |request: &Request| {
            ResponseTemplate::new(200).set_body_raw(html_page(request, escape), "text/html")
        })
        .mount(server)
        .await;
}

async fn echo_server() -> MockServer {
    let server = MockServer::start().await;
    mount_html(&server, "/search", verbatim).await;
    server
}

fn input_for(server: &MockServer, lines: &[&str]) -> Cursor<Vec<u8>> {
    let mut input = String::new();
    for line in lines {
        if line.starts_with('/') {
            input.push_str(&server.uri());
        }
        input.push_str(line);
        input.push('\n');
    }
    Cursor::new(input.into_bytes())
}

fn chars_of(findings: &[Finding]) -> BTreeSet<char> {
    findings.iter().map(|f| f.character).collect()
}

#[tokio::test]
async fn echoed_parameter_is_discovered() {
    let server = echo_server().await;
    let found = Discoverer::new(client())
        .discover(&target(&server, "/search?q=hello"))
        .await
        .unwrap();
    assert_eq!(found, vec![candidate(&server, "/search?q=hello", "q")]);
}

#[tokio::test]
async fn only_reflected_parameters_are_discovered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            let q = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_raw(format!("<p>{q}</p>"), "text/html")
        })
        .mount(&server)
        .await;

    let found = Discoverer::new(client())
        .discover(&target(&server, "/search?q=hello&id=7&q=hello"))
        .await
        .unwrap();
    assert_eq!(found, vec![candidate(&server, "/search?q=hello&id=7&q=hello", "q")]);
}

#[tokio::test]
async fn discovery_is_idempotent_on_a_static_target() {
    let server = echo_server().await;
    let discoverer = Discoverer::new(client());
    let url = target(&server, "/search?a=alpha&b=bravo&c=charlie");
    let first = discoverer.discover(&url).await.unwrap();
    let second = discoverer.discover(&url).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
}

#[tokio::test]
async fn redirect_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", "/elsewhere")
                .set_body_raw("<p>hello</p>", "text/html"),
        )
        .mount(&server)
        .await;

    let reason = Discoverer::new(client())
        .discover(&target(&server, "/search?q=hello"))
        .await
        .unwrap_err();
    assert!(matches!(reason, SkipReason::Redirect { status: 301 }));

    let result = runner(2)
        .run(input_for(&server, &["/search?q=hello"]), |_| {})
        .await
        .unwrap();
    assert!(result.findings.is_empty());
    assert_eq!(result.stages[0].emitted, 0);
}

#[tokio::test]
async fn non_html_content_type_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(|request: &Request| {
            ResponseTemplate::new(200)
                .set_body_raw(html_page(request, verbatim), "application/json")
        })
        .mount(&server)
        .await;

    let reason = Discoverer::new(client())
        .discover(&target(&server, "/api?q=hello"))
        .await
        .unwrap_err();
    match reason {
        SkipReason::NonHtmlContentType { content_type } => {
            assert!(content_type.starts_with("application/json"))
        }
        other => panic!("unexpected skip: {other}"),
    }

    let result = runner(2)
        .run(input_for(&server, &["/api?q=hello"]), |_| {})
        .await
        .unwrap();
    assert!(result.findings.is_empty());
}

#[tokio::test]
async fn connection_failure_is_a_transport_skip() {
    let unreachable = ProbeTarget::parse("http://127.0.0.1:1/?q=hello").unwrap();
    let reason = Discoverer::new(client())
        .discover(&unreachable)
        .await
        .unwrap_err();
    assert_eq!(reason.label(), "transport-error");
    assert!(Discoverer::new(client()).apply(unreachable).await.is_empty());
}

#[tokio::test]
async fn client_sends_configured_identity() {
    let server = echo_server().await;
    let client = ProbeClient::new(&ProbeConfig {
        header: Some("X-Probe: yes".to_string()),
        ..probe_config()
    })
    .unwrap();
    let page = client
        .probe(&target(&server, "/search?q=hello"))
        .await
        .into_page()
        .unwrap();
    assert_eq!(page.status, 200);
    assert!(page.body.contains("hello"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    assert_eq!(
        headers.get("user-agent").unwrap().to_str().unwrap(),
        DEFAULT_USER_AGENT
    );
    assert_eq!(headers.get("x-probe").unwrap().to_str().unwrap(), "yes");
}

#[tokio::test]
async fn confirmer_drops_coincidental_matches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/static"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>hello world</p>", "text/html"))
        .mount(&server)
        .await;

    let url = target(&server, "/static?q=hello");
    let found = Discoverer::new(client()).discover(&url).await.unwrap();
    assert_eq!(found.len(), 1);

    let confirmer = Confirmer::new(client());
    assert!(!confirmer.confirm(&found[0]).await.unwrap());
    assert!(confirmer.apply(found[0].clone()).await.is_empty());
}

#[tokio::test]
async fn confirmer_keeps_echoed_parameter() {
    let server = echo_server().await;
    let c = candidate(&server, "/search?q=hello&page=2", "q");
    let confirmer = Confirmer::new(client());
    assert_eq!(confirmer.marker(), DEFAULT_MARKER);
    assert!(confirmer.confirm(&c).await.unwrap());

    let requests = server.received_requests().await.unwrap();
    let sent = requests[0].url.query().unwrap().to_string();
    assert_eq!(sent, format!("q=hello{DEFAULT_MARKER}&page=2"));
}

#[tokio::test]
async fn only_unescaped_quote_is_reported() {
    let server = MockServer::start().await;
    mount_html(&server, "/search", escape_all_but_quote).await;

    let findings = runner(4)
        .run(input_for(&server, &["/search?q=hello"]), |_| {})
        .await
        .unwrap()
        .findings;
    assert_eq!(
        findings,
        vec![Finding {
            url: format!("{}/search?q=hello", server.uri()),
            param: "q".to_string(),
            character: '"',
        }]
    );
}

#[tokio::test]
async fn single_character_results_are_a_subset_of_full_results() {
    let server = MockServer::start().await;
    mount_html(&server, "/search", escape_all_but_quote).await;
    let c = candidate(&server, "/search?q=hello", "q");

    let full = chars_of(&CharProber::new(client()).apply(c.clone()).await);
    for ch in DEFAULT_PROBE_CHARS {
        let single = CharProber::new(client()).with_chars(&[ch]).apply(c.clone()).await;
        assert!(single.len() <= 1);
        assert!(chars_of(&single).is_subset(&full), "{ch} not in full run");
    }
    assert_eq!(full, BTreeSet::from(['"']));
}

#[tokio::test]
async fn marker_echo_never_yields_a_character_finding() {
    // reflects values, but answers every character payload with the marker
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            let echoed: String = request
                .url
                .query_pairs()
                .map(|(_, v)| {
                    if v.contains(DEFAULT_PAYLOAD_PREFIX) {
                        DEFAULT_MARKER.to_string()
                    } else {
                        v.into_owned()
                    }
                })
                .collect();
            ResponseTemplate::new(200).set_body_raw(format!("<p>{echoed}</p>"), "text/html")
        })
        .mount(&server)
        .await;

    let result = runner(3)
        .run(input_for(&server, &["/search?q=hello"]), |_| {})
        .await
        .unwrap();
    assert!(result.findings.is_empty());
    assert_eq!(result.stages[1].emitted, 1);
}

#[tokio::test]
async fn findings_require_the_unmodified_value_to_be_reflected() {
    // echoes a value only once a marker or payload has been appended to it
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(|request: &Request| {
            let echoed: String = request
                .url
                .query_pairs()
                .filter(|(_, v)| v.contains(DEFAULT_MARKER) || v.contains(DEFAULT_PAYLOAD_PREFIX))
                .map(|(_, v)| v.into_owned())
                .collect();
            ResponseTemplate::new(200).set_body_raw(format!("<p>{echoed}</p>"), "text/html")
        })
        .mount(&server)
        .await;

    let c = candidate(&server, "/search?q=hello", "q");
    assert!(Confirmer::new(client()).confirm(&c).await.unwrap());
    assert!(!CharProber::new(client()).apply(c).await.is_empty());

    let result = runner(2)
        .run(input_for(&server, &["/search?q=hello"]), |_| {})
        .await
        .unwrap();
    assert_eq!(result.stages[0].consumed, 1);
    assert_eq!(result.stages[0].emitted, 0);
    assert_eq!(result.stages[1].consumed, 0);
    assert!(result.findings.iter().all(|f| f.param != "q"));
    assert!(result.findings.is_empty());
}

#[tokio::test]
async fn findings_name_the_url_as_it_was_read() {
    let server = echo_server().await;

    let line = format!("{}/search?q=it's", server.uri());
    let result = runner(2)
        .run(Cursor::new(format!("{line}\n").into_bytes()), |_| {})
        .await
        .unwrap();
    assert_eq!(result.findings.len(), DEFAULT_PROBE_CHARS.len());
    assert!(result.findings.iter().all(|f| f.url == line && f.param == "q"));

    let quote = Finding {
        url: line.clone(),
        param: "q".to_string(),
        character: '"',
    };
    assert!(result.findings.contains(&quote));
    assert_eq!(
        quote.to_string(),
        format!("param q is reflected and allows \" on {line}")
    );
}

#[tokio::test]
async fn static_page_produces_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>nothing here</p>", "text/html"))
        .mount(&server)
        .await;

    let result = runner(2)
        .run(
            input_for(&server, &["/a?q=hello", "/b?x=1&y=2", "/c"]),
            |_| {},
        )
        .await
        .unwrap();
    assert!(result.findings.is_empty());
    assert_eq!(result.stages[0].consumed, 3);
    assert_eq!(result.stages[1].consumed, 0);
    assert_eq!(result.stages[2].consumed, 0);
}

#[tokio::test]
async fn full_run_reports_every_unescaped_character() {
    let server = echo_server().await;
    let mut seen = Vec::new();
    let result = runner(4)
        .run(
            input_for(
                &server,
                &["/search?q=hello", "", "not a url", "/search?name=world&q=hi"],
            ),
            |f| seen.push(f.clone()),
        )
        .await
        .unwrap();

    assert_eq!(result.feed.accepted, 2);
    assert_eq!(result.feed.rejected, 1);
    assert_eq!(seen, result.findings);

    let params: BTreeSet<(String, String)> = result
        .findings
        .iter()
        .map(|f| (f.url.clone(), f.param.clone()))
        .collect();
    assert_eq!(params.len(), 3);
    assert_eq!(result.findings.len(), 3 * DEFAULT_PROBE_CHARS.len());
    let first_url = format!("{}/search?q=hello", server.uri());
    let for_first: Vec<Finding> = result
        .findings
        .iter()
        .filter(|f| f.url == first_url)
        .cloned()
        .collect();
    assert_eq!(chars_of(&for_first), BTreeSet::from(DEFAULT_PROBE_CHARS));
}

#[tokio::test]
async fn run_terminates_for_every_concurrency() {
    let server = echo_server().await;
    let lines = ["/search?q=one", "/search?q=two&r=three", "/search", "/search?q=four"];
    let mut baseline: Option<Vec<Finding>> = None;

    for workers in 1..=6 {
        let result = tokio::time::timeout(
            Duration::from_secs(30),
            runner(workers).run(input_for(&server, &lines), |_| {}),
        )
        .await
        .unwrap_or_else(|_| panic!("run with {workers} workers did not finish"))
        .unwrap();

        let mut findings = result.findings;
        findings.sort();
        match baseline.as_ref() {
            Some(expected) => assert_eq!(&findings, expected, "workers = {workers}"),
            None => baseline = Some(findings),
        }
    }
    assert_eq!(
        baseline.map(|f| f.len()),
        Some(4 * DEFAULT_PROBE_CHARS.len())
    );
}
