//! Application Startup
//!
//! Application building, background task wiring, and server initialization.
//! Everything with a lifecycle (broker, hub, push dispatcher, fan-out
//! workers) is constructed here and handed down explicitly; shutdown is one
//! cancellation token observed by all of them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::RoomService;
use crate::config::Settings;
use crate::domain::{MessageRepository, MovieRepository, UserRepository};
use crate::infrastructure::broker::{Broker, EventPublisher};
use crate::infrastructure::cache::{self, RedisCache, UserCache};
use crate::infrastructure::database;
use crate::infrastructure::notification::NotificationFanout;
use crate::infrastructure::push::{FcmSender, PushDispatcher, PushSender};
use crate::infrastructure::repositories::{
    PgMessageRepository, PgMovieRepository, PgRoomRepository, PgUserRepository,
};
use crate::presentation::http::routes;
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{Hub, HubHandle, MessageRouter};
use crate::shared::reporting::{ErrorReporter, TracingReporter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub users: Arc<dyn UserRepository>,
    pub movies: Arc<dyn MovieRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub hub: HubHandle,
    pub router: Arc<MessageRouter>,
    pub room_service: Arc<RoomService>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    broker: Broker,
    shutdown: CancellationToken,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);

        // Create database pool
        let db = database::create_pool(&settings.database).await?;
        database::run_migrations(&db).await?;
        tracing::info!("Database connection pool created");

        // Create Redis client
        let redis = cache::create_redis_client(&settings.redis).await?;

        // Repositories
        let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(db.clone()));
        let movies: Arc<dyn MovieRepository> = Arc::new(PgMovieRepository::new(db.clone()));
        let messages = Arc::new(PgMessageRepository::new(db.clone()));
        let rooms = Arc::new(PgRoomRepository::new(db.clone()));

        // Broker client; connections are dialed by the supervision loop
        let broker = Broker::new(settings.broker.clone(), reporter.clone(), shutdown.clone());
        let publisher: Arc<dyn EventPublisher> = Arc::new(broker.publisher());

        // Presence hub and inbound router
        let hub = Hub::spawn(messages.clone(), publisher.clone(), reporter.clone());
        let router = Arc::new(MessageRouter::new(
            hub.clone(),
            messages.clone(),
            users.clone(),
            publisher.clone(),
            reporter.clone(),
        ));
        let room_service = Arc::new(RoomService::new(rooms, hub.clone()));

        // Push pipeline: batching dispatcher feeding FCM, fed by the
        // notification fan-out workers
        let push_sender: Arc<dyn PushSender> = Arc::new(FcmSender::new(&settings.push));
        let dispatcher = PushDispatcher::new(
            push_sender,
            settings.push.batch_size,
            settings.push.flush_interval(),
        )
        .spawn(shutdown.clone());
        let user_cache = Arc::new(UserCache::new(
            RedisCache::with_prefix(redis, "reelchat:"),
            settings.redis.user_cache_ttl_secs,
        ));
        NotificationFanout::start(
            broker.clone(),
            &settings.broker,
            user_cache,
            users.clone(),
            dispatcher,
            reporter.clone(),
        );

        // Create app state
        let state = AppState {
            db,
            users,
            movies,
            messages,
            hub,
            router,
            room_service,
            settings: Arc::new(settings.clone()),
        };

        // Build router with middleware
        let router = routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let addr = settings.server.socket_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            broker,
            shutdown,
        })
    }

    /// Run the server until stopped
    pub async fn run_until_stopped(self) -> Result<()> {
        // Broker supervision runs for the life of the process
        let broker = self.broker.clone();
        let broker_task = tokio::spawn(async move { broker.run().await });

        // Ctrl-C flips the shared shutdown token
        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                signal_token.cancel();
            }
        });

        let serve_token = self.shutdown.clone();
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { serve_token.cancelled().await })
            .await?;

        // Make sure background work winds down even if the server stopped
        // for another reason, then wait for the broker to drain and close.
        self.shutdown.cancel();
        broker_task.await?;

        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
