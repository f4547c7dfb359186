// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

use harvestrs::domain::models::job::{Job, JobStatus};
use harvestrs::domain::models::template::PaginationRule;

use super::helpers::{book_page, book_template, create_harness, fast_config, no_cancel};

#[tokio::test]
async fn test_blocked_first_page_fails_after_retry_budget() {
    let h = create_harness().await;

    // Every attempt is answered with a rate-limit block
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&h.server)
        .await;

    let template_id = h.templates.insert(book_template());
    let job = Job::new(
        "books",
        template_id,
        format!("{}/catalogue/page-1.html", h.server.uri()),
        fast_config(50),
    );

    let done = h.orchestrator.run(job, no_cancel()).await;

    assert_eq!(done.status, JobStatus::Failed);
    // The exhausted page counts as attempted, so the item counters
    // stay bounded by pages_fetched times the declared field count
    assert_eq!(done.pages_fetched, 1);
    assert_eq!(done.items_failed, 1);
    assert!(
        done.items_scraped + done.items_failed
            <= u64::from(done.pages_fetched) * book_template().field_count() as u64
    );
    let reason = done.last_error.as_deref().unwrap();
    assert!(reason.contains("Page 1"), "unexpected reason: {}", reason);
    assert!(reason.contains("429"), "unexpected reason: {}", reason);
}

#[tokio::test]
async fn test_transient_block_recovers_within_budget() {
    let h = create_harness().await;

    // Two blocks, then the page comes through
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "Soumission",
            "£50.10",
            None,
        )))
        .mount(&h.server)
        .await;

    let template_id = h.templates.insert(book_template());
    let job = Job::new(
        "books",
        template_id,
        format!("{}/catalogue/page-1.html", h.server.uri()),
        fast_config(50),
    );

    let done = h.orchestrator.run(job, no_cancel()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.items_scraped, 1);
}

#[tokio::test]
async fn test_cancellation_takes_effect_at_a_checkpoint() {
    let h = create_harness().await;

    // Any list page responds; pattern pagination keeps advancing
    Mock::given(method("GET"))
        .and(path_regex(r"^/list$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(book_page("Book", "£10.00", None)),
        )
        .mount(&h.server)
        .await;

    let mut template = book_template();
    template.pagination = Some(PaginationRule {
        next_selector: None,
        url_pattern: Some(format!("{}/list?page={{page}}", h.server.uri())),
        max_pages: 0,
    });
    let template_id = h.templates.insert(template);

    let mut config = fast_config(1000);
    config.delay_min_ms = 200;
    config.delay_max_ms = 200;
    let job = Job::new(
        "books",
        template_id,
        format!("{}/list", h.server.uri()),
        config,
    );
    let job_id = job.id;

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let orchestrator = h.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.run(job, cancel_rx).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel_tx.send(true).expect("job still running");

    let done = handle.await.unwrap();
    assert_eq!(done.status, JobStatus::Stopped);
    assert!(done.pages_fetched >= 1);
    assert!(done.pages_fetched < 1000);

    let stored = h.storage.job_state(job_id).unwrap();
    assert_eq!(stored.status, JobStatus::Stopped);
}

#[tokio::test]
async fn test_pagination_cycle_guard_terminates_the_job() {
    let h = create_harness().await;

    // Page one and page two link to each other forever
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "Book One",
            "£10.00",
            Some("page-2.html"),
        )))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "Book Two",
            "£11.00",
            Some("page-1.html"),
        )))
        .mount(&h.server)
        .await;

    let template_id = h.templates.insert(book_template());
    let job = Job::new(
        "books",
        template_id,
        format!("{}/catalogue/page-1.html", h.server.uri()),
        fast_config(50),
    );
    let job_id = job.id;

    let done = h.orchestrator.run(job, no_cancel()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.pages_fetched, 2);
    assert_eq!(h.storage.page_count(job_id), 2);
}
