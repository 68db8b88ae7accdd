//! Loader orchestration tests against scripted browsers.
//!
//! Run with: cargo test --test loader_test

mod common;

use common::{FakeBrowser, JournalHook, LogBuilder, Script};
use har_capturer::config::Config;
use har_capturer::har::SequentialPageIds;
use har_capturer::loader::EvaluateHook;
use har_capturer::{Har, HarError, Loader, LoaderEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| u.to_string()).collect()
}

fn drain(rx: &mut UnboundedReceiver<LoaderEvent>) -> Vec<LoaderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[LoaderEvent], kind: &str) -> usize {
    events
        .iter()
        .filter(|e| {
            matches!(
                (kind, e),
                ("load", LoaderEvent::Load { .. })
                    | ("done", LoaderEvent::Done { .. })
                    | ("fail", LoaderEvent::Fail { .. })
                    | ("archive", LoaderEvent::Archive(_))
            )
        })
        .count()
}

fn failures(events: &[LoaderEvent]) -> Vec<&HarError> {
    events
        .iter()
        .filter_map(|e| match e {
            LoaderEvent::Fail { error, .. } => Some(error),
            _ => None,
        })
        .collect()
}

async fn capture(
    browser: Arc<FakeBrowser>,
    list: &[&str],
    config: Config,
) -> (Har, Vec<LoaderEvent>) {
    let (loader, mut rx) = Loader::new(urls(list), Arc::new(config), browser);
    let har = loader.with_page_ids(SequentialPageIds).run().await;
    (har, drain(&mut rx))
}

#[tokio::test]
async fn test_single_page_capture() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let (har, events) = capture(browser.clone(), &["http://example.com/"], Config::default()).await;

    assert_eq!(har.log.pages.len(), 1);
    assert_eq!(har.log.pages[0].id, "page_1");
    assert_eq!(har.log.pages[0].title, "http://example.com/");
    assert_eq!(har.log.entries.len(), 1);
    assert_eq!(har.log.entries[0].pageref, "page_1");

    assert_eq!(count(&events, "load"), 1);
    assert_eq!(count(&events, "done"), 1);
    assert_eq!(count(&events, "fail"), 0);
    assert!(matches!(events.last(), Some(LoaderEvent::Archive(_))));
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test]
async fn test_unreachable_urls_yield_empty_archive() {
    let browser = Arc::new(FakeBrowser::new());
    let mut config = Config::default();
    config.loader.retry = 2;

    let (har, events) = capture(
        browser.clone(),
        &["http://nope.invalid/", "http://gone.invalid/"],
        config,
    )
    .await;

    assert!(har.log.pages.is_empty());
    assert!(har.log.entries.is_empty());
    assert_eq!(count(&events, "load"), 6);
    assert_eq!(count(&events, "fail"), 6);
    assert_eq!(count(&events, "done"), 0);
    assert_eq!(count(&events, "archive"), 1);
    assert!(
        failures(&events)
            .iter()
            .all(|e| matches!(e, HarError::Navigation(m) if m == "net::ERR_NAME_NOT_RESOLVED"))
    );
    assert_eq!(browser.created(), 6);
    assert_eq!(browser.destroyed(), 6);
}

#[tokio::test]
async fn test_offline_browser_fails_every_attempt() {
    let browser = Arc::new(FakeBrowser::offline());
    let mut config = Config::default();
    config.loader.retry = 1;

    let (har, events) = capture(browser, &["http://example.com/"], config).await;

    assert!(har.log.pages.is_empty());
    assert_eq!(count(&events, "fail"), 2);
    assert!(
        failures(&events)
            .iter()
            .all(|e| matches!(e, HarError::Connection(_)))
    );
}

#[tokio::test]
async fn test_zero_timeout_fails_without_done() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let mut config = Config::default();
    config.loader.timeout_ms = Some(0);

    let (har, events) = capture(browser.clone(), &["http://example.com/"], config).await;

    assert!(har.log.pages.is_empty());
    assert_eq!(count(&events, "done"), 0);
    assert_eq!(count(&events, "fail"), 1);
    assert!(matches!(failures(&events)[0], HarError::Timeout));
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_page_times_out() {
    let browser = Arc::new(FakeBrowser::new().script("http://slow.test/", Script::Hang));
    let mut config = Config::default();
    config.loader.timeout_ms = Some(500);

    let (har, events) = capture(browser.clone(), &["http://slow.test/"], config).await;

    assert!(har.log.pages.is_empty());
    assert!(matches!(failures(&events)[..], [HarError::Timeout]));
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test]
async fn test_lost_session_reports_disconnected() {
    let browser = Arc::new(FakeBrowser::new().script("http://example.com/", Script::Disconnect));
    let (har, events) = capture(browser.clone(), &["http://example.com/"], Config::default()).await;

    assert!(har.log.pages.is_empty());
    let errors = failures(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "Disconnected");
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test]
async fn test_subresource_failure_keeps_page() {
    let url = "http://example.com/";
    let events = LogBuilder::new()
        .request("1", url, "other")
        .response("1", url, "http/1.1", json!({"Content-Type": "text/html"}))
        .request("2", "http://example.com/missing.js", "parser")
        .failed("2", "net::ERR_CONNECTION_RESET")
        .data("1", 100)
        .finished("1", 300.0)
        .dom_content()
        .load()
        .events();
    let browser = Arc::new(FakeBrowser::new().script(url, Script::Load(events)));

    let (har, events) = capture(browser, &[url], Config::default()).await;

    assert_eq!(har.log.pages.len(), 1);
    assert_eq!(count(&events, "done"), 1);
    // The failed script never got a response, so it has no entry.
    assert_eq!(har.log.entries.len(), 1);
    assert_eq!(har.log.entries[0].request.url, url);
}

#[tokio::test]
async fn test_sequential_abort_stops_after_first_failure() {
    let browser = Arc::new(FakeBrowser::new().serve("http://good.test/"));
    let mut config = Config::default();
    config.loader.abort_on_failure = true;
    config.loader.retry = 1;

    let (har, events) = capture(
        browser.clone(),
        &["http://bad.invalid/", "http://good.test/"],
        config,
    )
    .await;

    assert!(har.log.pages.is_empty());
    assert_eq!(count(&events, "load"), 2);
    assert_eq!(count(&events, "fail"), 2);
    assert!(events.iter().all(|e| match e {
        LoaderEvent::Load { index, .. } => *index == 0,
        _ => true,
    }));
    assert!(
        !browser
            .journal()
            .contains(&"navigate http://good.test/".to_string())
    );
}

#[tokio::test]
async fn test_parallel_ignores_abort_on_failure() {
    let browser = Arc::new(
        FakeBrowser::new()
            .serve("http://a.test/")
            .serve("http://b.test/"),
    );
    let mut config = Config::default();
    config.loader.abort_on_failure = true;
    config.loader.parallel = Some(2);

    let (har, events) = capture(
        browser,
        &["http://bad.invalid/", "http://a.test/", "http://b.test/"],
        config,
    )
    .await;

    assert_eq!(har.log.pages.len(), 2);
    assert_eq!(count(&events, "load"), 3);
    assert_eq!(count(&events, "fail"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_pages_keep_input_order() {
    let slow = LogBuilder::page("http://slow.test/").events();
    let browser = Arc::new(
        FakeBrowser::new()
            .script("http://slow.test/", Script::Slow(Duration::from_millis(200), slow))
            .serve("http://fast.test/")
            .serve("http://third.test/"),
    );
    let mut config = Config::default();
    config.loader.parallel = Some(3);

    let (har, events) = capture(
        browser,
        &["http://slow.test/", "http://fast.test/", "http://third.test/"],
        config,
    )
    .await;

    let titles: Vec<&str> = har.log.pages.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(
        titles,
        ["http://slow.test/", "http://fast.test/", "http://third.test/"]
    );
    let ids: Vec<&str> = har.log.pages.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["page_1", "page_2", "page_3"]);

    // The slow page finished last.
    let done: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            LoaderEvent::Done { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(done.last(), Some(&0));
}

#[tokio::test]
async fn test_parallel_hooks_are_bounded_by_degree() {
    let list = ["http://a.test/", "http://b.test/", "http://c.test/"];
    let mut browser = FakeBrowser::new();
    for url in list {
        browser = browser.serve(url);
    }
    let browser = Arc::new(browser);
    let hook = JournalHook::new(browser.journal.clone());

    let mut config = Config::default();
    config.loader.parallel = Some(2);
    let (loader, _rx) = Loader::new(urls(&list), Arc::new(config), browser.clone());
    let har = loader
        .with_pre_hook(hook.clone())
        .with_post_hook(hook)
        .run()
        .await;
    assert_eq!(har.log.pages.len(), 3);

    let hooks: Vec<String> = browser
        .journal()
        .into_iter()
        .filter(|e| e.starts_with("pre") || e.starts_with("post"))
        .collect();
    assert_eq!(hooks.len(), 6);
    assert!(hooks[0].starts_with("pre"));
    assert!(hooks[1].starts_with("pre"));

    // The third page only starts once a worker is free.
    let third = hooks.iter().position(|e| e == "pre 2").unwrap();
    let first_post = hooks.iter().position(|e| e.starts_with("post")).unwrap();
    assert!(first_post < third);
}

#[tokio::test]
async fn test_post_hook_value_lands_on_page() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let hook = JournalHook::new(browser.journal.clone());
    let (loader, _rx) = Loader::new(
        urls(&["http://example.com/"]),
        Arc::new(Config::default()),
        browser,
    );

    let har = loader.with_post_hook(hook).run().await;
    assert_eq!(
        har.log.pages[0].user,
        Some(json!({"index": 0, "url": "http://example.com/"}))
    );

    let document = serde_json::to_value(&har).unwrap();
    assert_eq!(document["log"]["pages"][0]["_user"]["index"], 0);
}

#[tokio::test]
async fn test_failing_pre_hook_still_releases_page() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let hook = JournalHook::failing(browser.journal.clone());
    let mut config = Config::default();
    config.loader.retry = 1;
    let (loader, mut rx) = Loader::new(
        urls(&["http://example.com/"]),
        Arc::new(config),
        browser.clone(),
    );

    let har = loader.with_pre_hook(hook).run().await;
    let events = drain(&mut rx);

    assert!(har.log.pages.is_empty());
    assert!(
        failures(&events)
            .iter()
            .all(|e| matches!(e, HarError::Hook(_)))
    );
    assert_eq!(browser.created(), 2);
    assert_eq!(browser.destroyed(), 2);
    assert!(
        !browser
            .journal()
            .iter()
            .any(|e| e.starts_with("navigate"))
    );
}

#[tokio::test]
async fn test_content_capture_attaches_bodies() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let mut config = Config::default();
    config.capture.content = true;

    let (har, _) = capture(browser, &["http://example.com/"], config).await;

    let content = &har.log.entries[0].response.content;
    assert_eq!(content.text.as_deref(), Some("body of 1"));
    assert_eq!(content.encoding, None);
}

#[tokio::test]
async fn test_user_agent_is_applied_before_navigation() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let mut config = Config::default();
    config.capture.user_agent = Some("har-test/1.0".into());

    capture(browser.clone(), &["http://example.com/"], config).await;

    let journal = browser.journal();
    let agent = journal.iter().position(|e| e == "user-agent har-test/1.0");
    let navigate = journal.iter().position(|e| e.starts_with("navigate"));
    assert!(agent.is_some());
    assert!(agent < navigate);
}

#[tokio::test]
async fn test_evaluate_hook_stores_result() {
    let browser = Arc::new(FakeBrowser::new().serve("http://example.com/"));
    let (loader, _rx) = Loader::new(
        urls(&["http://example.com/"]),
        Arc::new(Config::default()),
        browser,
    );

    let har = loader
        .with_post_hook(Arc::new(EvaluateHook::new("document.title")))
        .run()
        .await;
    assert_eq!(
        har.log.pages[0].user,
        Some(json!({"evaluated": "document.title"}))
    );
}

/// The page loads at once; a script request arrives 50ms later.
fn late_script(url: &str) -> Script {
    let page = LogBuilder::page(url);
    let loaded = page.event_count();
    let events = page
        .request("2", "http://example.com/late.js", "script")
        .response(
            "2",
            "http://example.com/late.js",
            "http/1.1",
            json!({"Content-Type": "text/javascript"}),
        )
        .data("2", 80)
        .finished("2", 150.0)
        .events();
    let (now, later) = events.split_at(loaded);
    Script::Then(now.to_vec(), Duration::from_millis(50), later.to_vec())
}

#[tokio::test(start_paused = true)]
async fn test_settle_window_records_late_requests() {
    let url = "http://example.com/";

    // Without a window the page is done before the script shows up.
    let browser = Arc::new(FakeBrowser::new().script(url, late_script(url)));
    let (har, _) = capture(browser, &[url], Config::default()).await;
    assert_eq!(har.log.entries.len(), 1);

    let browser = Arc::new(FakeBrowser::new().script(url, late_script(url)));
    let mut config = Config::default();
    config.capture.settle_ms = 200;
    let (har, events) = capture(browser.clone(), &[url], config).await;

    assert_eq!(count(&events, "done"), 1);
    let entries: Vec<&str> = har.log.entries.iter().map(|e| e.request.url.as_str()).collect();
    assert_eq!(entries, [url, "http://example.com/late.js"]);
    assert!(har.log.entries.iter().all(|e| e.pageref == "page_1"));
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test]
async fn test_body_fetch_failure_fails_page() {
    let url = "http://example.com/";
    let browser = Arc::new(FakeBrowser::new().serve(url).fail_body("1"));
    let mut config = Config::default();
    config.capture.content = true;

    let (har, events) = capture(browser.clone(), &[url], config).await;

    assert!(har.log.pages.is_empty());
    assert_eq!(count(&events, "done"), 0);
    assert!(matches!(
        failures(&events)[..],
        [HarError::ResponseBody(message)] if message.starts_with("1: ")
    ));
    assert_eq!(browser.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_body_failure_while_settling_keeps_page() {
    let url = "http://example.com/";
    let browser = Arc::new(
        FakeBrowser::new()
            .script(url, late_script(url))
            .fail_body("2"),
    );
    let mut config = Config::default();
    config.capture.content = true;
    config.capture.settle_ms = 200;

    let (har, events) = capture(browser, &[url], config).await;

    assert_eq!(count(&events, "done"), 1);
    assert_eq!(count(&events, "fail"), 0);
    let entries = &har.log.entries;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].response.content.text.as_deref(), Some("body of 1"));
    assert_eq!(entries[1].request.url, "http://example.com/late.js");
    assert_eq!(entries[1].response.content.text, None);
}

#[tokio::test(start_paused = true)]
async fn test_retries_wait_between_attempts() {
    let browser = Arc::new(FakeBrowser::new());
    let mut config = Config::default();
    config.loader.retry = 2;
    config.loader.retry_delay_ms = 1000;

    let started = tokio::time::Instant::now();
    let (_, events) = capture(browser, &["http://nope.invalid/"], config).await;
    let elapsed = started.elapsed();

    assert_eq!(count(&events, "fail"), 3);
    // One delay per retry, none after the last attempt.
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3));
}
