//! Buffered producer example against the in-memory broker
//!
//! Run with `RUST_LOG=relaybuf=debug` to watch flushes and retries.

use clap::Parser;
use relaybuf::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Buffer messages, inject failures and watch them get retried")]
struct Args {
    /// Topic to produce to
    #[arg(long, default_value = "relaybuf-demo")]
    topic: String,

    /// Number of messages to produce
    #[arg(short = 'n', long, default_value_t = 20)]
    messages: usize,

    /// Flush automatically once this many messages are buffered (-1 disables)
    #[arg(long, default_value_t = 8, allow_negative_numbers = true)]
    max_buffer_size: i64,

    /// Retries per message
    #[arg(long, default_value_t = 2)]
    retries: usize,

    /// Fail this many deliveries at the start
    #[arg(long, default_value_t = 3)]
    fail_deliveries: usize,

    /// Flush one message at a time, keeping strict order
    #[arg(long)]
    preserve_order: bool,

    /// Use the asynchronous flush method for automatic flushes
    #[arg(long)]
    async_flush: bool,

    /// Simulated delivery latency in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    println!("📦 relaybuf - Buffered Producer Example");
    println!("=======================================");

    let config = ProducerConfig::builder()
        .max_buffer_size(args.max_buffer_size)
        .max_number_retries(args.retries)
        .flush_method(if args.async_flush {
            FlushMethod::Async
        } else {
            FlushMethod::Sync
        })
        .queue_full_notification(QueueFullNotification::OncePerMessage)
        .build()?;
    let broker_config = InMemoryBrokerConfig::new()
        .with_delivery_latency(Duration::from_millis(args.latency_ms));
    let producer: BufferedProducer<InMemoryBroker> = BufferedProducer::new(config, broker_config)?;

    let failures = Arc::new(AtomicUsize::new(0));
    {
        let failures = Arc::clone(&failures);
        producer.set_produce_failure_callback(move |message, error| {
            failures.fetch_add(1, Ordering::Relaxed);
            println!("⚠️  Delivery to {} failed: {}", message.topic(), error);
            true
        });
    }
    producer.set_produce_termination_callback(|message, error| {
        println!(
            "❌ Gave up on {:?}: {}",
            String::from_utf8_lossy(message.payload()),
            error
        );
    });
    producer.set_flush_termination_callback(|message, error| {
        println!("❌ Broker refused {}: {}", message.topic(), error);
    });

    producer.broker().fail_next_deliveries(args.fail_deliveries);

    for i in 0..args.messages {
        let message = producer
            .make_builder(args.topic.as_str())
            .key(format!("key-{}", i % 4))
            .payload(format!("event #{}", i))
            .header("source", "example")
            .build();
        producer.add_message(message)?;
    }
    println!("✅ Buffered {} messages", args.messages);

    producer.flush(args.preserve_order)?;
    producer.wait_for_acks()?;

    let metrics = producer.metrics();
    println!();
    println!("📊 Results");
    println!("   delivered:       {}", metrics.total_produced);
    println!("   dropped:         {}", metrics.total_dropped);
    println!("   retries:         {}", metrics.retries);
    println!("   send attempts:   {}", metrics.send_attempts);
    println!("   failure reports: {}", failures.load(Ordering::Relaxed));
    println!("   still buffered:  {}", producer.buffer_size());

    let order: Vec<String> = producer
        .broker()
        .delivered()
        .iter()
        .map(|message| String::from_utf8_lossy(message.payload()).into_owned())
        .collect();
    println!("   delivery order:  {}", order.join(", "));

    Ok(())
}
