use anyhow::Context;
use clap::{Arg, ArgAction, Command, value_parser};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{panic, process};
use tokio_util::sync::CancellationToken;

use vdisplay::config::{Config, app_name, version};
use vdisplay::display::{
    CaptureSession, CreateRequest, DisplayGeometry, DisplayState, FRAME_PERIOD, NotificationDispatcher,
    OwnerBinder, Surface, VirtualDisplayFlags,
};
use vdisplay::service::VirtualDisplayService;
use vdisplay::sim::{InMemoryCompositor, RecordingCallback, RecordingListener, SimCaptureSession, SimOwner};

struct SimApp {
    owner: Arc<SimOwner>,
    callback: Arc<RecordingCallback>,
    session: Arc<SimCaptureSession>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON config file.")
                .value_parser(value_parser!(PathBuf))
                .default_value("vdisplay.json"),
        )
        .arg(
            Arg::new("displays")
                .short('n')
                .long("displays")
                .value_name("COUNT")
                .help("Number of virtual displays the scripted session creates.")
                .value_parser(value_parser!(u32).range(1..=64))
                .default_value("3"),
        )
        .arg(
            Arg::new("dump")
                .short('d')
                .long("dump")
                .help("Print the service state as JSON before releasing the displays.")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("vdisplay.json"));
    let displays = matches.get_one::<u32>("displays").copied().unwrap_or(3);
    let dump = matches.get_flag("dump");

    let config = Config::load(&config_path)?;

    // kill the main thread as soon as a secondary thread panics
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        orig_hook(panic_info);
        process::exit(105);
    }));

    let cancel = CancellationToken::new();
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || {
            warn!("Interrupted, shutting down");
            cancel.cancel();
        }
    })
    .context("Error setting Ctrl-C handler")?;

    let notifications_cancel = CancellationToken::new();
    let (dispatcher, notifications) = NotificationDispatcher::spawn(notifications_cancel.clone());

    let compositor = Arc::new(InMemoryCompositor::new());
    let listener = Arc::new(RecordingListener::new());
    let service = Arc::new(VirtualDisplayService::new(
        compositor.clone(),
        listener.clone(),
        dispatcher,
        config,
    ));

    let traversal = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    tokio::select! {
        result = scripted_session(&service, displays, dump) => result?,
        _ = cancel.cancelled() => info!("Scripted session interrupted"),
    }

    let released = service.release_all();
    info!("Released {} remaining virtual display(s)", released);

    cancel.cancel();
    traversal.await.context("traversal loop panicked")?;
    notifications_cancel.cancel();
    notifications.await.context("notification worker panicked")?;

    info!(
        "Done: {} created, {} destroyed, {} registry events; service {}; notifications {}",
        compositor.created_count(),
        compositor.destroyed_count(),
        listener.changes().len(),
        service.health().summary(),
        service.delivery_health().summary()
    );
    Ok(())
}

async fn scripted_session(service: &VirtualDisplayService, displays: u32, dump: bool) -> anyhow::Result<()> {
    let frame = FRAME_PERIOD;
    let mut apps = Vec::new();

    for i in 0..displays {
        let app = SimApp {
            owner: Arc::new(SimOwner::new(format!("com.example.cast{}", i))),
            callback: Arc::new(RecordingCallback::new()),
            session: Arc::new(SimCaptureSession::new()),
        };
        let flags = if i == 0 {
            VirtualDisplayFlags::PUBLIC | VirtualDisplayFlags::PRESENTATION
        } else {
            VirtualDisplayFlags::AUTO_MIRROR
        };
        service.create_virtual_display(CreateRequest {
            owner: app.owner.clone(),
            callback: app.callback.clone(),
            capture_session: Some(app.session.clone() as Arc<dyn CaptureSession>),
            owner_uid: 10_000 + i,
            owner_package_name: app.owner.package_name().to_string(),
            name: format!("cast-{}", i),
            geometry: DisplayGeometry::new(1280, 720, 320),
            surface: Some(Surface::new(format!("cast-{}-surface", i))),
            flags,
        })?;
        apps.push(app);
    }
    tokio::time::sleep(frame * 3).await;

    if let Some(first) = apps.first() {
        let token = first.owner.token();
        service.resize_virtual_display(token, 1920, 1080, 480)?;
        service.request_display_state(token, DisplayState::Off)?;
        service.request_display_state(token, DisplayState::On)?;
        service.set_virtual_display_surface(token, None);
        tokio::time::sleep(frame * 3).await;
        service.set_virtual_display_surface(token, Some(Surface::new("cast-0-surface-2")));
    }

    if apps.len() > 1 {
        info!("Stopping the capture session of {}", apps[1].owner.package_name());
        apps[1].session.stop();
    }
    if apps.len() > 2 {
        let last = &apps[apps.len() - 1];
        info!("Killing {}", last.owner.package_name());
        last.owner.kill();
    }
    tokio::time::sleep(frame * 3).await;

    if dump {
        let json = serde_json::to_string_pretty(&service.dump())?;
        println!("{}", json);
    }

    for app in &apps {
        let info = service.display_info(app.owner.token());
        match info {
            Some(info) => info!(
                "{}: '{}' {}x{} state {:?}",
                app.owner.token(),
                info.name,
                info.width,
                info.height,
                info.state
            ),
            None => info!("{}: no display", app.owner.token()),
        }
        info!(
            "{} received {:?}",
            app.owner.package_name(),
            app.callback.messages()
        );
    }

    if let Some(second) = apps.get(1) {
        service.release_virtual_display(second.owner.token());
    }
    Ok(())
}
