use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use nearby_chat::{
    AppState,
    chat::SystemClock,
    config::Config,
    identity::{
        ChainedIdentityProvider, IdentityProvider, JwtIdentityProvider, RedisSessionProvider,
    },
    router::create_router,
    store::{PgLocationStore, PgMessageStore},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'nearby_chat';").await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let redis_arc = Arc::new(redis_client);

    // 身份解析：先看 Bearer token，再看会话 cookie
    let providers: Vec<Arc<dyn IdentityProvider>> = vec![
        Arc::new(JwtIdentityProvider::new(&config.jwt_secret)),
        Arc::new(RedisSessionProvider::new(redis_arc, config.session_ttl())),
    ];
    let identity = Arc::new(ChainedIdentityProvider::new(providers));

    let (state, scheduler) = AppState::new(
        config.clone(),
        identity,
        Arc::new(PgLocationStore::new(pool.clone())),
        Arc::new(PgMessageStore::new(pool)),
        Arc::new(SystemClock),
    );

    // 开放时段调度与关闭期间的消息清理
    let retention_task = scheduler.spawn();

    let router = create_router(state);

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    retention_task.abort();
    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
