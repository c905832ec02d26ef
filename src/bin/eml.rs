//! EML CLI — encrypted training with loss monitoring over gossipsub
//!
//! Commands:
//!   eml prepare — generate a context and an encrypted synthetic dataset
//!   eml train   — fit on the stored dataset, publishing losses over gossipsub
//!   eml relay   — re-encrypt losses from the loss topic onto the relay topic
//!   eml watch   — print relayed losses (decrypts with the stored context)
//!   eml demo    — the whole pipeline in one process on an in-memory bus

use eml_core::bus::{run_swarm, InMemoryBus, MessageBus, NetworkEvent, SwarmConfig, SwarmHandle};
use eml_core::codec::{encrypt_rows, CipherArray};
use eml_core::he::{SecretContext, SimulatedCiphertext, SimulatedContext};
use eml_core::monitor::{LossPublisher, PublishMode};
use eml_core::relay::{LossRelay, PubSubEvent, RelayOutput};
use eml_core::storage::{self, FsObjectStore};
use eml_core::train::LoggingSink;
use eml_core::{EmlError, EncryptedLinearRegression, PipelineConfig, Result, TopicPath};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn print_usage() {
    println!(
        r#"
EML — Encrypted Machine Learning

Usage: eml [--config <file>] <command> [options]

Commands:
  prepare [samples] [features]   Generate context + encrypted dataset into the store
  train                          Fit on the stored dataset, publish losses
  relay                          Re-encrypt losses onto the relay topic
  watch                          Print relayed losses
  demo                           Run the full pipeline in-process
  init-config <file>             Write the default config to <file>

Examples:
  eml prepare 64 2
  eml relay
  eml --config eml.json train
  eml demo
"#
    );
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            eprintln!("--config needs a file");
            std::process::exit(2);
        }
        let path = args[1].clone();
        args.drain(..2);
        match PipelineConfig::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("  Failed to load {}: {}", path, e);
                std::process::exit(2);
            }
        }
    } else {
        PipelineConfig::default()
    };

    let Some(command) = args.first().cloned() else {
        print_usage();
        return;
    };

    let result = match command.as_str() {
        "prepare" => cmd_prepare(&config, &args[1..]),
        "train" => cmd_train(config).await,
        "relay" => cmd_relay(config).await,
        "watch" => cmd_watch(config).await,
        "demo" => cmd_demo(config),
        "init-config" => cmd_init_config(&config, &args[1..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("  Error: {}", e);
        std::process::exit(1);
    }
}

fn store_for(config: &PipelineConfig) -> FsObjectStore {
    FsObjectStore::new(&config.storage_root)
}

fn load_context(config: &PipelineConfig) -> Result<SimulatedContext> {
    storage::load_context(
        &store_for(config),
        &config.bucket,
        &config.context_path,
        config.precision,
    )
}

/// `y = x · w + 0.5 + noise` with `w = [1.5, -1.0, 1.5, -1.0, ...]`
fn synthetic_dataset(
    rng: &mut StdRng,
    samples: usize,
    features: usize,
) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    let noise = Normal::new(0.0, 0.01).map_err(|e| EmlError::Config(e.to_string()))?;
    let weights: Vec<f64> = (0..features).map(|j| if j % 2 == 0 { 1.5 } else { -1.0 }).collect();
    let mut x = Vec::with_capacity(samples);
    let mut y = Vec::with_capacity(samples);
    for _ in 0..samples {
        let row: Vec<f64> = (0..features).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let target = row.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>() + 0.5;
        y.push(vec![target + noise.sample(rng)]);
        x.push(row);
    }
    Ok((x, y))
}

fn prepare_store(config: &PipelineConfig, samples: usize, features: usize) -> Result<SimulatedContext> {
    let store = store_for(config);
    let mut ctx = SimulatedContext::generate();
    ctx.set_precision(config.precision)?;
    let mut rng = StdRng::from_entropy();
    let (x, y) = synthetic_dataset(&mut rng, samples, features)?;

    storage::save_context(&store, &config.bucket, &config.context_path, &ctx)?;
    storage::save_cipher_array::<SimulatedContext, _>(
        &store,
        &config.bucket,
        &config.x_path,
        &encrypt_rows(&ctx, &x),
    )?;
    storage::save_cipher_array::<SimulatedContext, _>(
        &store,
        &config.bucket,
        &config.y_path,
        &encrypt_rows(&ctx, &y),
    )?;
    Ok(ctx)
}

fn cmd_prepare(config: &PipelineConfig, args: &[String]) -> Result<()> {
    let samples: usize = args.first().and_then(|s| s.parse().ok()).unwrap_or(32);
    let features: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
    if samples == 0 || features == 0 {
        return Err(EmlError::Config("samples and features must be at least 1".into()));
    }

    let ctx = prepare_store(config, samples, features)?;
    println!("\n  Context {} (precision {})", ctx.key_id, ctx.precision());
    println!("  {} samples x {} features encrypted", samples, features);
    println!(
        "  Stored under {}/{}",
        config.storage_root, config.bucket
    );
    Ok(())
}

fn cmd_init_config(config: &PipelineConfig, args: &[String]) -> Result<()> {
    let path = args.first().map(String::as_str).unwrap_or("eml.json");
    config.save(path)?;
    println!("  Wrote {}", path);
    Ok(())
}

struct Fitted {
    coefficients: Vec<f64>,
    intercept: f64,
    final_loss: Option<f64>,
}

fn fit_and_report<B: MessageBus>(
    ctx: &SimulatedContext,
    config: &PipelineConfig,
    x: &CipherArray<SimulatedCiphertext>,
    y: &CipherArray<SimulatedCiphertext>,
    bus: B,
) -> Result<Fitted> {
    let mut model = EncryptedLinearRegression::new(ctx, config.optimizer.clone());
    let mut publisher =
        LossPublisher::new(ctx, bus, config.loss_topic_path()).with_mode(config.publish_mode);
    model.encrypted_fit(x, y, &mut publisher)?;

    let final_loss = match model.losses()?.last() {
        Some(loss) => Some(ctx.decrypt(loss)?),
        None => None,
    };
    Ok(Fitted {
        coefficients: model.decrypt_coefficients()?,
        intercept: model.decrypt_intercept()?,
        final_loss,
    })
}

fn print_model(fitted: &Fitted) {
    println!("\n  Model coeff.  {:?}", fitted.coefficients);
    println!("  Intercept     {:.6}", fitted.intercept);
    if let Some(loss) = fitted.final_loss {
        println!("  Final loss    {:.6}", loss);
    }
}

/// Wait for the first peer so gossipsub has somewhere to publish
async fn wait_for_peer(evt_rx: &mut mpsc::Receiver<NetworkEvent>, timeout: Duration) -> bool {
    let wait = async {
        while let Some(event) = evt_rx.recv().await {
            if let NetworkEvent::PeerDiscovered(peer) = event {
                println!("  Peer discovered: {}", peer);
                return true;
            }
        }
        false
    };
    tokio::time::timeout(timeout, wait).await.unwrap_or(false)
}

async fn start_swarm(
    config: &PipelineConfig,
    topics: Vec<TopicPath>,
) -> Result<(SwarmHandle, mpsc::Receiver<NetworkEvent>)> {
    let swarm_config = SwarmConfig {
        listen_port: config.swarm_port,
        topics,
        ..SwarmConfig::default()
    };
    let (peer_id, handle, evt_rx) = run_swarm(swarm_config)
        .await
        .map_err(|e| EmlError::Delivery(format!("failed to start P2P swarm: {}", e)))?;
    println!("  Peer ID: {}", peer_id);
    Ok((handle, evt_rx))
}

async fn cmd_train(config: PipelineConfig) -> Result<()> {
    println!("\n  Starting EML trainer...");
    let store = store_for(&config);
    let ctx = load_context(&config)?;
    let x = storage::load_cipher_array(&store, &ctx, &config.bucket, &config.x_path)?;
    let y = storage::load_cipher_array(&store, &ctx, &config.bucket, &config.y_path)?;

    let (handle, mut evt_rx) = start_swarm(&config, Vec::new()).await?;
    if !wait_for_peer(&mut evt_rx, Duration::from_secs(15)).await {
        handle.shutdown().await;
        return Err(EmlError::Delivery("no peers discovered; start `eml relay` first".into()));
    }
    // Let the peer's subscriptions arrive before the first publish
    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::spawn(async move { while evt_rx.recv().await.is_some() {} });

    let bus = handle.clone();
    let fitted = tokio::task::spawn_blocking(move || fit_and_report(&ctx, &config, &x, &y, bus))
        .await
        .map_err(|e| EmlError::Delivery(format!("training task panicked: {}", e)))?;
    handle.shutdown().await;

    print_model(&fitted?);
    Ok(())
}

async fn cmd_relay(config: PipelineConfig) -> Result<()> {
    println!("\n  Starting EML relay...");
    let loss_topic = config.loss_topic_path();
    let (handle, mut evt_rx) = start_swarm(&config, vec![loss_topic.clone()]).await?;
    let relay: Arc<LossRelay<SimulatedContext, _, _>> = Arc::new(LossRelay::new(
        store_for(&config),
        handle.clone(),
        config.relay_config(),
    ));
    println!("  Relaying {} -> {}", loss_topic, relay.config().output_topic);
    println!("  Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = evt_rx.recv() => {
                let NetworkEvent::MessageReceived(msg) = event else { continue };
                if msg.topic != loss_topic {
                    continue;
                }
                let relay = relay.clone();
                let event = PubSubEvent::from_bus_message(&msg);
                // Failures were already logged; the next message is handled regardless
                let _ = tokio::task::spawn_blocking(move || relay.on_event(&event)).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("\n  Shutting down...");
    handle.shutdown().await;
    Ok(())
}

fn decrypt_relayed(ctx: &SimulatedContext, data: &[u8]) -> Result<f64> {
    let output: RelayOutput = serde_json::from_slice(data)?;
    ctx.decrypt(&ctx.ciphertext_from_record(&output.reencrypted_loss)?)
}

async fn cmd_watch(config: PipelineConfig) -> Result<()> {
    let ctx = load_context(&config)?;
    let relay_topic = config.relay_topic_path();
    let (handle, mut evt_rx) = start_swarm(&config, vec![relay_topic.clone()]).await?;
    println!("  Watching {}. Press Ctrl+C to stop.\n", relay_topic);

    loop {
        tokio::select! {
            Some(event) = evt_rx.recv() => {
                let NetworkEvent::MessageReceived(msg) = event else { continue };
                if msg.topic != relay_topic {
                    continue;
                }
                match decrypt_relayed(&ctx, &msg.data) {
                    Ok(loss) => println!("  loss={:.6}  ({})", loss, msg.id),
                    Err(e) => eprintln!("  Unreadable message {}: {}", msg.id, e),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.shutdown().await;
    Ok(())
}

fn cmd_demo(mut config: PipelineConfig) -> Result<()> {
    println!("\n  EML demo: prepare -> train -> relay, in-process\n");
    config.storage_root = env::temp_dir()
        .join(format!("eml-demo-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .into_owned();
    // The relay only understands encrypted loss messages
    config.publish_mode = PublishMode::Encrypted;

    let ctx = prepare_store(&config, 32, 1)?;
    let store = store_for(&config);
    let x = storage::load_cipher_array(&store, &ctx, &config.bucket, &config.x_path)?;
    let y = storage::load_cipher_array(&store, &ctx, &config.bucket, &config.y_path)?;

    // Plain fit first, logging every tenth loss
    let mut baseline = EncryptedLinearRegression::new(&ctx, config.optimizer.clone());
    baseline.encrypted_fit(&x, &y, &mut LoggingSink::new(&ctx).every(10))?;

    let bus = InMemoryBus::new();
    let fitted = fit_and_report(&ctx, &config, &x, &y, &bus)?;
    print_model(&fitted);

    let relay: LossRelay<SimulatedContext, _, _> =
        LossRelay::new(&store, &bus, config.relay_config());
    let inbound = bus.drain(&config.loss_topic_path());
    println!("\n  Relaying {} loss messages", inbound.len());
    for msg in &inbound {
        relay.on_event(&PubSubEvent::from_bus_message(msg))?;
    }

    for (epoch, msg) in bus.messages(&config.relay_topic_path()).iter().enumerate() {
        println!("  epoch={:>4} | relayed loss={:.6}", epoch, decrypt_relayed(&ctx, &msg.data)?);
    }

    std::fs::remove_dir_all(&config.storage_root).ok();
    Ok(())
}
