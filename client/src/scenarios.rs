//! End-to-end checks run against a live notification server.

use anyhow::Result;
use colored::*;
use std::time::{Duration, Instant};
use stomp::Topic;

use crate::connection::Connection;
use crate::output::{print_message, TestResult};
use crate::update_log::UpdateLog;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
const QUIET_PERIOD: Duration = Duration::from_millis(300);

fn product_destination(product_id: &str) -> String {
    format!("/app/product/{}", product_id)
}

fn category_destination(category_id: &str) -> String {
    format!("/app/category/{}", category_id)
}

/// Subscribe to a product, publish one update, expect it rendered in the log.
pub async fn test_product_update_rendered(url: &str) -> Result<TestResult> {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Product Update Rendered ===".bright_cyan().bold());

    let subscriber = Connection::establish(url, "Subscriber").await?;
    let publisher = Connection::establish(url, "Publisher").await?;
    let mut updates = subscriber.subscribe_confirmed(Topic::product("42")?).await?;
    println!("{} Subscribed to /topic/product/42", "✓".green());

    publisher
        .publish_confirmed(&product_destination("42"), "restock")
        .await?;
    println!("{} Published 'restock' to /app/product/42", "→".blue());

    let mut log = UpdateLog::new();
    let result = match updates.next_within(DELIVERY_TIMEOUT).await {
        Some(message) => {
            let rendered = log.append(&message).to_string();
            print_message(subscriber.label(), &message, &rendered);
            if rendered == "<p>Product Update: restock</p>" {
                TestResult::pass("product_update_rendered", start.elapsed())
            } else {
                TestResult::fail(
                    "product_update_rendered",
                    format!("Unexpected rendering {}", rendered),
                    start.elapsed(),
                )
            }
        }
        None => TestResult::fail(
            "product_update_rendered",
            "No update received",
            start.elapsed(),
        ),
    };

    drop(updates);
    publisher.disconnect().await?;
    subscriber.disconnect().await?;
    Ok(result)
}

/// A subscription nobody publishes to stays silent.
pub async fn test_quiet_category(url: &str) -> Result<TestResult> {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Quiet Category ===".bright_cyan().bold());

    let subscriber = Connection::establish(url, "Subscriber").await?;
    let mut updates = subscriber.subscribe_confirmed(Topic::category("7")?).await?;

    let result = match updates.next_within(QUIET_PERIOD).await {
        None => {
            println!("{} No update rendered", "✓".green());
            TestResult::pass("quiet_category", start.elapsed())
        }
        Some(message) => TestResult::fail(
            "quiet_category",
            format!("Unexpected update: {}", message.body),
            start.elapsed(),
        ),
    };

    drop(updates);
    subscriber.disconnect().await?;
    Ok(result)
}

/// Two connections on one topic each get exactly one copy of one publish.
pub async fn test_fan_out(url: &str) -> Result<TestResult> {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Fan Out ===".bright_cyan().bold());

    let first = Connection::establish(url, "Subscriber 1").await?;
    let second = Connection::establish(url, "Subscriber 2").await?;
    let publisher = Connection::establish(url, "Publisher").await?;
    let mut first_updates = first.subscribe_confirmed(Topic::product("42")?).await?;
    let mut second_updates = second.subscribe_confirmed(Topic::product("42")?).await?;

    publisher
        .publish_confirmed(&product_destination("42"), "price drop")
        .await?;

    let mut failures = Vec::new();
    for (connection, updates) in [(&first, &mut first_updates), (&second, &mut second_updates)] {
        match updates.next_within(DELIVERY_TIMEOUT).await {
            Some(message) if message.body == "price drop" => {
                println!("{} {} received one copy", "✓".green(), connection.label());
            }
            Some(message) => failures.push(format!(
                "{} received unexpected '{}'",
                connection.label(),
                message.body
            )),
            None => failures.push(format!("{} received nothing", connection.label())),
        }
        if updates.next_within(QUIET_PERIOD).await.is_some() {
            failures.push(format!("{} received a duplicate", connection.label()));
        }
    }

    drop(first_updates);
    drop(second_updates);
    publisher.disconnect().await?;
    first.disconnect().await?;
    second.disconnect().await?;

    Ok(if failures.is_empty() {
        TestResult::pass("fan_out", start.elapsed())
    } else {
        TestResult::fail("fan_out", failures.join("; "), start.elapsed())
    })
}

/// Messages published before a subscription exists are never replayed.
pub async fn test_late_subscriber(url: &str) -> Result<TestResult> {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Late Subscriber ===".bright_cyan().bold());

    let publisher = Connection::establish(url, "Publisher").await?;
    let subscriber = Connection::establish(url, "Subscriber").await?;

    publisher
        .publish_confirmed(&category_destination("9"), "too early")
        .await?;
    let mut updates = subscriber.subscribe_confirmed(Topic::category("9")?).await?;

    let result = match updates.next_within(QUIET_PERIOD).await {
        None => TestResult::pass("late_subscriber", start.elapsed()),
        Some(message) => TestResult::fail(
            "late_subscriber",
            format!("Replayed update: {}", message.body),
            start.elapsed(),
        ),
    };

    drop(updates);
    publisher.disconnect().await?;
    subscriber.disconnect().await?;
    Ok(result)
}

/// A message for one topic never shows up on another topic of the same connection.
pub async fn test_topic_isolation(url: &str) -> Result<TestResult> {
    let start = Instant::now();
    println!("\n{}", "=== TEST: Topic Isolation ===".bright_cyan().bold());

    let subscriber = Connection::establish(url, "Subscriber").await?;
    let publisher = Connection::establish(url, "Publisher").await?;
    let mut product_updates = subscriber.subscribe_confirmed(Topic::product("1")?).await?;
    let mut category_updates = subscriber.subscribe_confirmed(Topic::category("1")?).await?;

    publisher
        .publish_confirmed(&product_destination("1"), "only products")
        .await?;

    let delivered = product_updates.next_within(DELIVERY_TIMEOUT).await;
    let leaked = category_updates.next_within(QUIET_PERIOD).await;

    let result = match (delivered, leaked) {
        (Some(_), None) => TestResult::pass("topic_isolation", start.elapsed()),
        (None, _) => TestResult::fail("topic_isolation", "Product update not delivered", start.elapsed()),
        (Some(_), Some(message)) => TestResult::fail(
            "topic_isolation",
            format!("Category subscription saw '{}'", message.body),
            start.elapsed(),
        ),
    };

    drop(product_updates);
    drop(category_updates);
    publisher.disconnect().await?;
    subscriber.disconnect().await?;
    Ok(result)
}

pub async fn run_all(url: &str) -> Result<Vec<TestResult>> {
    Ok(vec![
        test_product_update_rendered(url).await?,
        test_quiet_category(url).await?,
        test_fan_out(url).await?,
        test_late_subscriber(url).await?,
        test_topic_isolation(url).await?,
    ])
}
