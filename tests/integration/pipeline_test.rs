// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use harvestrs::domain::models::job::{Job, JobStatus};
use harvestrs::domain::models::template::SelectorSpec;

use super::helpers::{book_page, book_template, create_harness, fast_config, no_cancel};

#[tokio::test]
async fn test_full_pipeline_over_two_pages() {
    let h = create_harness().await;

    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "A Light in the   Attic",
            "£51.77",
            Some("page-2.html"),
        )))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "Tipping the Velvet",
            "£53.74",
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
    let job_id = job.id;

    let done = h.orchestrator.run(job, no_cancel()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.pages_fetched, 2);
    assert_eq!(done.items_scraped, 2);
    assert_eq!(done.items_failed, 0);

    let pages = h.storage.pages(job_id);
    assert_eq!(pages.len(), 2);
    assert!((pages[0].success_rate - 1.0).abs() < f64::EPSILON);

    // Whitespace is normalized, the price is a number, the link is absolute
    assert_eq!(pages[0].item["title"], json!("A Light in the Attic"));
    assert_eq!(pages[0].item["price"], json!(51.77));
    assert_eq!(
        pages[0].item["detail_url"],
        json!(format!("{}/catalogue/detail.html", h.server.uri()))
    );
    assert_eq!(pages[1].item["title"], json!("Tipping the Velvet"));
    assert_eq!(pages[1].item["price"], json!(53.74));

    // The final state reached storage
    let stored = h.storage.job_state(job_id).unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100.0);
}

#[tokio::test]
async fn test_selector_fallback_survives_markup_change() {
    let h = create_harness().await;

    // The page no longer carries the legacy class the template lists first
    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(book_page(
            "Sharp Objects",
            "£47.82",
            None,
        )))
        .mount(&h.server)
        .await;

    let mut template = book_template();
    template.fields[0].selectors = vec![
        SelectorSpec::css("h1.legacy-title"),
        SelectorSpec::css("h1.title"),
    ];
    let template_id = h.templates.insert(template);

    let job = Job::new(
        "books",
        template_id,
        format!("{}/catalogue/page-1.html", h.server.uri()),
        fast_config(50),
    );
    let job_id = job.id;

    let done = h.orchestrator.run(job, no_cancel()).await;

    assert_eq!(done.status, JobStatus::Completed);
    let pages = h.storage.pages(job_id);
    assert_eq!(pages[0].item["title"], json!("Sharp Objects"));
    assert!((pages[0].success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_missing_required_field_counts_against_the_page() {
    let h = create_harness().await;

    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            // No price on this page
            r#"<html><body><h1 class="title">Bare Page</h1></body></html>"#,
        ))
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

    // The fetch worked, so the job completes; the item is counted as failed
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.items_scraped, 0);
    assert_eq!(done.items_failed, 1);

    let pages = h.storage.pages(job_id);
    assert_eq!(pages.len(), 1);
    assert!(pages[0].success_rate < 1.0);
}
