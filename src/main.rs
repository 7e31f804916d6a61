use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use xk_monitor::captcha::ProcessCaptchaSolver;
use xk_monitor::config::Config;
use xk_monitor::events::ChannelEventSink;
use xk_monitor::http::recovery::RecoveryCoordinator;
use xk_monitor::http::login;
use xk_monitor::http::HttpSession;
use xk_monitor::notify;
use xk_monitor::scheduler::Scheduler;
use xk_monitor::types::{Session, WishlistEntry};
use xk_monitor::wishlist::Wishlist;
use xk_monitor::CoreEvent;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    println!("xk-monitor {VERSION}");

    let config_path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            println!("[!] Please provide the path to a configuration file.");
            return ExitCode::FAILURE;
        }
    };

    if !Path::new(&config_path).exists() {
        println!("[!] Invalid path. Please provide the path to a configuration file.");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            println!("[!] Bad config file. Please fix it and then try again.\n{e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Loaded configuration from '{config_path}'.");

    let reqwest_client = reqwest::Client::new();
    let solver = ProcessCaptchaSolver::new(config.captcha_command.clone());
    let credentials = config.credentials();

    let initial_session = Session {
        campus_code: config.campus_code.clone(),
        batch_code: config.batch_code.clone(),
        ..Session::default()
    };

    info!("Logging in...");
    let logged_in_session = match login::login(&reqwest_client, &config.base_url, &credentials, &solver, 0)
        .await
    {
        Ok(mut session) => {
            session.campus_code = config.campus_code.clone();
            session.batch_code = config.batch_code.clone();
            session
        }
        Err(e) => {
            error!("Initial login failed: {e}");
            println!("[!] Could not log in. Please check your credentials and try again.\n{e}");
            return ExitCode::FAILURE;
        }
    };

    let http_session = Arc::new(HttpSession::new(config.base_url.clone(), logged_in_session));

    let (event_sink, mut event_receiver) = ChannelEventSink::new();
    let events: Arc<dyn xk_monitor::EventSink> = Arc::new(event_sink);

    let recovery = Arc::new(RecoveryCoordinator::new(
        reqwest_client.clone(),
        config.base_url.clone(),
        credentials,
        solver,
        http_session.clone(),
        events.clone(),
    ));

    let wishlist = Arc::new(Wishlist::new());
    for entry in &config.wishlist {
        wishlist.add(WishlistEntry {
            record: placeholder_record(entry),
        });
    }

    let notification = config.notification.clone();
    let notify_client = reqwest_client.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_receiver.recv().await {
            log_event(&event);
            if notification.enabled {
                if let Some(key) = &notification.webhook_key {
                    dispatch_notification(&notify_client, key, &event).await;
                }
            }
        }
    });

    let scheduler = Scheduler::new(http_session.clone(), wishlist.clone(), recovery, events);
    let stop_flag = scheduler.stop_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal; asking the scheduler to stop.");
        stop_flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    scheduler.run().await;
    drop(scheduler);

    let _ = event_task.await;

    println!("Exiting.");
    ExitCode::SUCCESS
}

/// Builds a minimally-populated record for a config-supplied wishlist entry. The monitor's
/// first query iteration replaces every field with the catalog's authoritative view; this
/// placeholder only needs to carry the identifier so the wishlist can track it before that
/// first query completes.
fn placeholder_record(
    entry: &xk_monitor::config::ConfigWishlistEntry,
) -> xk_monitor::types::TeachingClassRecord {
    xk_monitor::types::TeachingClassRecord {
        id: entry.to_identifier(),
        course_name: String::new(),
        teacher_name: String::new(),
        time_and_place: String::new(),
        capacity: 0,
        enrolled: 0,
        is_full: false,
        is_conflict: false,
        is_chosen: false,
        conflict_desc: None,
    }
}

fn log_event(event: &CoreEvent) {
    match event {
        CoreEvent::Status(text) => info!("{text}"),
        CoreEvent::LoginStatus { online, detail } => info!("login status: online={online} ({detail})"),
        CoreEvent::Heartbeat(count) => info!("heartbeat: {count}"),
        CoreEvent::GrabSuccess(record) => info!("grabbed: {}", record.course_name),
        CoreEvent::GrabFailed(reason) => info!("grab failed: {reason}"),
        CoreEvent::AvailabilityDetected { course_name, remain, capacity, .. } => {
            info!("availability: {course_name} has {remain}/{capacity} seats open");
        }
        CoreEvent::SessionUpdated { .. } => info!("session rotated"),
        CoreEvent::NeedRelogin => error!("credentials rejected; the user must supply new ones"),
        CoreEvent::SwapDangling { dropped_course_name, target_course_name } => error!(
            "SWAP DANGLING: dropped '{dropped_course_name}' while swapping for '{target_course_name}' and could not roll back"
        ),
    }
}

async fn dispatch_notification(client: &reqwest::Client, key: &str, event: &CoreEvent) {
    match event {
        CoreEvent::GrabSuccess(record) => {
            let body = notify::grab_success_body(
                &record.course_name,
                &record.display_teacher_name(),
                &record.time_and_place,
            );
            notify::notify(client, key, "Course grabbed", &body).await;
        }
        CoreEvent::SwapDangling { dropped_course_name, target_course_name } => {
            let body = notify::swap_dangling_body(dropped_course_name, target_course_name);
            notify::notify(client, key, "Manual action required", &body).await;
        }
        CoreEvent::NeedRelogin => {
            notify::notify(
                client,
                key,
                "Login required",
                "Credentials were rejected; the monitor has stopped attempting to recover.",
            )
            .await;
        }
        _ => {}
    }
}
