#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod request_logger;
pub mod routes;

use crate::auth::{AuthConfig, AuthService, PgCredentialStore, RedisTokenCache, SystemClock};
use crate::db::AuthDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(AuthDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match AuthDb::fetch(&rocket) {
                    Some(db) => match db::run_migrations(db).await {
                        Ok(_) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    },
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Auth Service",
            |rocket| async move {
                let config = match AuthConfig::from_env() {
                    Ok(config) => config,
                    Err(err) => {
                        log::error!("invalid auth configuration: {}", err);
                        return Err(rocket);
                    }
                };

                let pool = match AuthDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for auth service");
                        return Err(rocket);
                    }
                };

                let cache = match RedisTokenCache::connect(&config.redis_url).await {
                    Ok(cache) => cache,
                    Err(err) => {
                        log::error!("failed to connect token cache: {}", err);
                        return Err(rocket);
                    }
                };

                match AuthService::new(
                    &config,
                    Arc::new(PgCredentialStore::new(pool)),
                    Arc::new(cache),
                    Arc::new(SystemClock),
                ) {
                    Ok(service) => {
                        log::info!("auth service ready: {:?}", config);
                        Ok(rocket.manage(service))
                    }
                    Err(err) => {
                        log::error!("failed to build auth service: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        .mount(
            "/api/v1",
            openapi_get_routes![
                routes::health::health_check,
                auth::routes::register,
                auth::routes::login,
                auth::routes::validate,
                auth::routes::refresh,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Auth API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::{Build, Rocket, Route};

    use crate::auth::{AuthConfig, AuthService, HashingParams};

    pub use containers::{TestContainerError, TestDatabase, TestRedis};
    pub use memory::{ManualClock, MemoryCredentialStore, MemoryTokenCache};

    pub const TEST_ACCESS_SECRET: &str = "test-access-secret";
    pub const TEST_REFRESH_SECRET: &str = "test-refresh-secret";

    /// Fixed starting instant for clock-driven tests.
    pub fn test_epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .expect("valid test epoch")
    }

    /// Configuration with cheap argon2 parameters.
    pub fn test_config() -> AuthConfig {
        AuthConfig {
            access_secret: TEST_ACCESS_SECRET.into(),
            refresh_secret: TEST_REFRESH_SECRET.into(),
            pepper: "test-pepper".into(),
            access_token_ttl_secs: 60 * 60,
            refresh_token_ttl_secs: 720 * 60 * 60,
            rotation_invalidates_previous: true,
            hashing: HashingParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            redis_url: "redis://127.0.0.1:6379/0".into(),
        }
    }

    /// An [`AuthService`] wired to in-memory doubles sharing one manual clock.
    pub struct MemoryHarness {
        pub service: AuthService,
        pub store: Arc<MemoryCredentialStore>,
        pub cache: Arc<MemoryTokenCache>,
        pub clock: ManualClock,
        pub config: AuthConfig,
    }

    impl MemoryHarness {
        pub fn new() -> Self {
            Self::with_config(test_config())
        }

        pub fn with_config(config: AuthConfig) -> Self {
            let clock = ManualClock::new(test_epoch());
            let store = Arc::new(MemoryCredentialStore::new());
            let cache = Arc::new(MemoryTokenCache::new(Arc::new(clock.clone())));
            let service = AuthService::new(
                &config,
                store.clone(),
                cache.clone(),
                Arc::new(clock.clone()),
            )
            .expect("auth service");

            Self {
                service,
                store,
                cache,
                clock,
                config,
            }
        }
    }

    pub mod memory {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        use async_trait::async_trait;
        use chrono::{DateTime, Duration, Utc};
        use dashmap::DashMap;
        use dashmap::mapref::entry::Entry;
        use parking_lot::Mutex;

        use crate::auth::{
            AuthError, AuthResult, Clock, CredentialRecord, CredentialStore, RefreshSession,
            TokenCache,
        };

        /// Clock that only moves when told to. Clones share the same instant.
        #[derive(Debug, Clone)]
        pub struct ManualClock {
            now: Arc<Mutex<DateTime<Utc>>>,
        }

        impl ManualClock {
            pub fn new(start: DateTime<Utc>) -> Self {
                Self {
                    now: Arc::new(Mutex::new(start)),
                }
            }

            pub fn advance(&self, by: Duration) {
                let mut now = self.now.lock();
                *now += by;
            }

            pub fn set(&self, to: DateTime<Utc>) {
                *self.now.lock() = to;
            }
        }

        impl Clock for ManualClock {
            fn now(&self) -> DateTime<Utc> {
                *self.now.lock()
            }
        }

        /// Credential store double with atomic login uniqueness and switchable write failures.
        #[derive(Default)]
        pub struct MemoryCredentialStore {
            users: DashMap<String, CredentialRecord>,
            sessions: DashMap<(String, String), RefreshSession>,
            fail_writes: AtomicBool,
        }

        impl MemoryCredentialStore {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn fail_writes(&self, fail: bool) {
                self.fail_writes.store(fail, Ordering::SeqCst);
            }

            pub fn record(&self, login: &str) -> Option<CredentialRecord> {
                self.users.get(login).map(|entry| entry.value().clone())
            }

            pub fn sessions_for_device(&self, device_id: &str) -> Vec<RefreshSession> {
                let mut sessions: Vec<RefreshSession> = self
                    .sessions
                    .iter()
                    .filter(|entry| entry.value().device_id == device_id)
                    .map(|entry| entry.value().clone())
                    .collect();
                sessions.sort_by(|a, b| a.login.cmp(&b.login));
                sessions
            }

            fn check_writable(&self) -> AuthResult<()> {
                if self.fail_writes.load(Ordering::SeqCst) {
                    Err(AuthError::Unavailable("credential store writes disabled".into()))
                } else {
                    Ok(())
                }
            }
        }

        #[async_trait]
        impl CredentialStore for MemoryCredentialStore {
            async fn find_by_login(&self, login: &str) -> AuthResult<Option<CredentialRecord>> {
                Ok(self.record(login))
            }

            async fn exists_by_login(&self, login: &str) -> AuthResult<bool> {
                Ok(self.users.contains_key(login))
            }

            async fn insert(&self, record: &CredentialRecord) -> AuthResult<()> {
                self.check_writable()?;
                match self.users.entry(record.login.clone()) {
                    Entry::Occupied(_) => Err(AuthError::UserExists),
                    Entry::Vacant(slot) => {
                        slot.insert(record.clone());
                        Ok(())
                    }
                }
            }

            async fn record_refresh_session(
                &self,
                login: &str,
                device_id: &str,
                issued_at: DateTime<Utc>,
                expires_at: DateTime<Utc>,
            ) -> AuthResult<()> {
                self.check_writable()?;
                self.sessions.insert(
                    (login.to_string(), device_id.to_string()),
                    RefreshSession {
                        login: login.to_string(),
                        device_id: device_id.to_string(),
                        issued_at,
                        expires_at,
                    },
                );
                Ok(())
            }

            async fn expire_refresh_sessions_for_device(
                &self,
                device_id: &str,
                now: DateTime<Utc>,
            ) -> AuthResult<u64> {
                self.check_writable()?;
                let mut expired = 0;
                for mut entry in self.sessions.iter_mut() {
                    let session = entry.value_mut();
                    if session.device_id == device_id && session.expires_at > now {
                        session.expires_at = now;
                        expired += 1;
                    }
                }
                Ok(expired)
            }
        }

        /// Token cache double that expires entries against the shared clock.
        pub struct MemoryTokenCache {
            entries: DashMap<String, (String, DateTime<Utc>)>,
            clock: Arc<dyn Clock>,
            fail_reads: AtomicBool,
            fail_writes: AtomicBool,
            /// Writes left before one fails; zero when disarmed.
            writes_until_failure: AtomicUsize,
        }

        impl MemoryTokenCache {
            pub fn new(clock: Arc<dyn Clock>) -> Self {
                Self {
                    entries: DashMap::new(),
                    clock,
                    fail_reads: AtomicBool::new(false),
                    fail_writes: AtomicBool::new(false),
                    writes_until_failure: AtomicUsize::new(0),
                }
            }

            pub fn fail_reads(&self, fail: bool) {
                self.fail_reads.store(fail, Ordering::SeqCst);
            }

            pub fn fail_writes(&self, fail: bool) {
                self.fail_writes.store(fail, Ordering::SeqCst);
            }

            /// Fail only the `nth` write from now on (1-based); later writes succeed again.
            pub fn fail_nth_write(&self, nth: usize) {
                self.writes_until_failure.store(nth, Ordering::SeqCst);
            }

            /// Drop every entry, as after a cache restart.
            pub fn clear(&self) {
                self.entries.clear();
            }

            pub fn keys(&self) -> Vec<String> {
                self.entries.iter().map(|entry| entry.key().clone()).collect()
            }
        }

        #[async_trait]
        impl TokenCache for MemoryTokenCache {
            async fn get(&self, key: &str) -> AuthResult<Option<String>> {
                if self.fail_reads.load(Ordering::SeqCst) {
                    return Err(AuthError::Unavailable("token cache reads disabled".into()));
                }

                let now = self.clock.now();
                let stored = self
                    .entries
                    .get(key)
                    .map(|entry| entry.value().clone());

                match stored {
                    Some((value, expires_at)) if expires_at > now => Ok(Some(value)),
                    Some(_) => {
                        self.entries.remove(key);
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }

            async fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()> {
                if self.fail_writes.load(Ordering::SeqCst) {
                    return Err(AuthError::Unavailable("token cache writes disabled".into()));
                }

                let countdown = self.writes_until_failure.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |left| left.checked_sub(1),
                );
                if countdown == Ok(1) {
                    return Err(AuthError::Unavailable("token cache write failed".into()));
                }

                let expires_at = self.clock.now() + ttl;
                self.entries
                    .insert(key.to_string(), (value.to_string(), expires_at));
                Ok(())
            }
        }
    }

    pub mod containers {
        use std::time::Duration as StdDuration;

        use sqlx::PgPool;
        use sqlx::postgres::PgPoolOptions;
        use testcontainers::{ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::redis::Redis;
        use thiserror::Error;

        use crate::auth::{AuthError, RedisTokenCache};

        const CONNECT_ATTEMPTS: u32 = 10;

        #[derive(Debug, Error)]
        pub enum TestContainerError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
            #[error("cache error: {0}")]
            Cache(#[from] AuthError),
        }

        /// Disposable, migrated Postgres instance for integration tests.
        pub struct TestDatabase {
            pool: PgPool,
            _container: ContainerAsync<Postgres>,
        }

        impl TestDatabase {
            pub async fn new() -> Result<Self, TestContainerError> {
                let container = Postgres::default().start().await?;
                let host = container.get_host().await?;
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

                let pool = connect_with_retry(&url).await?;
                crate::db::run_migrations(&pool).await?;

                Ok(Self {
                    pool,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                &self.pool
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone()
            }

            pub async fn close(self) {
                self.pool.close().await;
            }
        }

        /// Postgres accepts connections slightly after the container reports ready.
        async fn connect_with_retry(url: &str) -> Result<PgPool, sqlx::Error> {
            let mut attempt = 1;
            loop {
                match PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(StdDuration::from_secs(5))
                    .connect(url)
                    .await
                {
                    Ok(pool) => return Ok(pool),
                    Err(err) if attempt >= CONNECT_ATTEMPTS => return Err(err),
                    Err(_) => {
                        attempt += 1;
                        tokio::time::sleep(StdDuration::from_millis(500)).await;
                    }
                }
            }
        }

        /// Disposable Redis instance with a connected [`RedisTokenCache`].
        pub struct TestRedis {
            cache: RedisTokenCache,
            _container: ContainerAsync<Redis>,
        }

        impl TestRedis {
            pub async fn new() -> Result<Self, TestContainerError> {
                let container = Redis::default().start().await?;
                let host = container.get_host().await?;
                let port = container.get_host_port_ipv4(6379).await?;
                let cache = RedisTokenCache::connect(&format!("redis://{host}:{port}")).await?;

                Ok(Self {
                    cache,
                    _container: container,
                })
            }

            pub fn cache(&self) -> &RedisTokenCache {
                &self.cache
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        service: Option<AuthService>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                service: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_auth_service(mut self, service: AuthService) -> Self {
            self.service = Some(service);
            self
        }

        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(service) = self.service {
                rocket = rocket.manage(service);
            }

            rocket
        }

        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }
}
