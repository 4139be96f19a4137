use anyhow::Result;
use clap::{Parser, Subcommand};
use client::output::{print_message, print_test_summary};
use client::{scenarios, Connection, UpdateLog};
use colored::*;
use futures_util::stream::{self, StreamExt};
use stomp::Topic;

#[derive(Parser)]
#[command(name = "stomp-client")]
#[command(about = "Watch, publish and test product and category notifications")]
struct Cli {
    /// Websocket URL of the notification server
    #[arg(long, default_value = "ws://127.0.0.1:4000/ws")]
    url: String,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe to product and category updates and print them as they arrive
    Watch {
        /// Product identifier to watch (repeatable)
        #[arg(long = "product-id")]
        product_ids: Vec<String>,

        /// Category identifier to watch (repeatable)
        #[arg(long = "category-id")]
        category_ids: Vec<String>,

        /// Exit after this many updates
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Send one update through the server's application destinations
    Publish {
        #[arg(long = "product-id", conflicts_with = "category_id", required_unless_present = "category_id")]
        product_id: Option<String>,

        #[arg(long = "category-id")]
        category_id: Option<String>,

        /// Update payload, relayed verbatim
        message: String,
    },
    /// Run end-to-end scenarios against the server
    Scenario {
        #[arg(long, value_enum, default_value = "all")]
        scenario: ScenarioChoice,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Subscribe to a product and expect one rendered update
    ProductUpdate,
    /// Subscribe to a category that nobody publishes to
    QuietCategory,
    /// Two subscribers on one topic each get one copy
    FanOut,
    /// Updates published before subscribing are not replayed
    LateSubscriber,
    /// Updates stay on their own topic
    TopicIsolation,
    /// Run every scenario
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    match cli.command {
        Command::Watch {
            product_ids,
            category_ids,
            limit,
        } => watch(&cli.url, product_ids, category_ids, limit).await,
        Command::Publish {
            product_id,
            category_id,
            message,
        } => publish(&cli.url, product_id, category_id, &message).await,
        Command::Scenario { scenario } => run_scenarios(&cli.url, scenario).await,
    }
}

async fn watch(
    url: &str,
    product_ids: Vec<String>,
    category_ids: Vec<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut topics = Vec::new();
    for product_id in &product_ids {
        topics.push(Topic::product(product_id)?);
    }
    for category_id in &category_ids {
        topics.push(Topic::category(category_id)?);
    }
    if topics.is_empty() {
        anyhow::bail!("Nothing to watch: pass --product-id and/or --category-id");
    }

    let connection = Connection::establish(url, "Watcher").await?;
    println!("{} Connected to {}", "✓".green(), url);

    let mut subscriptions = Vec::new();
    for topic in topics {
        println!("{} Subscribing to {}", "→".blue(), topic);
        subscriptions.push(connection.subscribe(topic));
    }

    let mut updates = stream::select_all(subscriptions);
    let mut log = UpdateLog::new();

    loop {
        tokio::select! {
            next = updates.next() => match next {
                Some(message) => {
                    let rendered = log.append(&message).to_string();
                    print_message(connection.label(), &message, &rendered);
                    if limit.is_some_and(|limit| log.len() >= limit) {
                        break;
                    }
                }
                None => {
                    println!("{} Connection closed by server", "✗".red());
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(updates);
    connection.disconnect().await
}

async fn publish(
    url: &str,
    product_id: Option<String>,
    category_id: Option<String>,
    message: &str,
) -> Result<()> {
    let destination = match (product_id, category_id) {
        (Some(product_id), _) => format!("/app/product/{}", product_id),
        (None, Some(category_id)) => format!("/app/category/{}", category_id),
        (None, None) => anyhow::bail!("Pass --product-id or --category-id"),
    };

    let connection = Connection::establish(url, "Publisher").await?;
    connection.publish_confirmed(&destination, message).await?;
    println!("{} Published to {}", "✓".green(), destination);
    connection.disconnect().await
}

async fn run_scenarios(url: &str, choice: ScenarioChoice) -> Result<()> {
    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let results = match choice {
        ScenarioChoice::ProductUpdate => vec![scenarios::test_product_update_rendered(url).await?],
        ScenarioChoice::QuietCategory => vec![scenarios::test_quiet_category(url).await?],
        ScenarioChoice::FanOut => vec![scenarios::test_fan_out(url).await?],
        ScenarioChoice::LateSubscriber => vec![scenarios::test_late_subscriber(url).await?],
        ScenarioChoice::TopicIsolation => vec![scenarios::test_topic_isolation(url).await?],
        ScenarioChoice::All => scenarios::run_all(url).await?,
    };

    // Print summary
    println!("\n{}", "=== RESULTS ===".bright_white().bold());
    print_test_summary(&results);

    let all_passed = results.iter().all(|r| r.passed);

    if all_passed {
        println!("\n{}", "All tests passed! ✓".bright_green().bold());
    } else {
        println!("\n{}", "Some tests failed! ✗".bright_red().bold());
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
