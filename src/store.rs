use crate::entity::{bot_api_keys, bot_tokens, channel_directories, part_messages, thread_sessions};
use anyhow::{Context as _, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const DB_FILE: &str = "bridge.db";

/// Kind of a project channel, mirrored into `channel_directories.channel_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Voice,
}

impl ChannelKind {
    fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "voice" {
            ChannelKind::Voice
        } else {
            ChannelKind::Text
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelBinding {
    pub channel_id: u64,
    pub directory: String,
    pub kind: ChannelKind,
}

/// Embedded relational store. One connection is owned for the life of the
/// process; every operation runs on the blocking pool holding its lock, so
/// the main loop stays the single writer.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<DatabaseConnection>>,
}

impl Store {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
        let db_path = data_dir.join(DB_FILE);
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let db = tokio::task::spawn_blocking(move || -> Result<DatabaseConnection> {
            let db = Database::connect(&db_url)?;

            db.get_schema_builder()
                .register(thread_sessions::Entity)
                .register(part_messages::Entity)
                .register(bot_tokens::Entity)
                .register(channel_directories::Entity)
                .register(bot_api_keys::Entity)
                .apply(&db)?;

            Ok(db)
        })
        .await??;

        info!("Store ready at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DatabaseConnection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap();
            f(&db)
        })
        .await?
    }

    // ── thread → session ────────────────────────────────────────────

    pub async fn thread_session(&self, thread_id: u64) -> Result<Option<String>> {
        self.run(move |db| {
            let row = thread_sessions::Entity::find()
                .filter(thread_sessions::Column::ThreadId.eq(thread_id as i64))
                .one(db)?;
            Ok(row.map(|r| r.session_id))
        })
        .await
    }

    pub async fn bind_thread_session(&self, thread_id: u64, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.run(move |db| {
            let record = thread_sessions::ActiveModel {
                rowid: NotSet,
                thread_id: Set(thread_id as i64),
                session_id: Set(session_id),
                created_at: Set(now_millis()),
            };
            thread_sessions::Entity::insert(record)
                .on_conflict(
                    OnConflict::column(thread_sessions::Column::ThreadId)
                        .update_columns([
                            thread_sessions::Column::SessionId,
                            thread_sessions::Column::CreatedAt,
                        ])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }

    pub async fn unbind_thread_session(&self, thread_id: u64) -> Result<()> {
        self.run(move |db| {
            thread_sessions::Entity::delete_many()
                .filter(thread_sessions::Column::ThreadId.eq(thread_id as i64))
                .exec(db)?;
            Ok(())
        })
        .await
    }

    // ── part → message ──────────────────────────────────────────────

    pub async fn part_message(&self, part_id: &str) -> Result<Option<u64>> {
        let part_id = part_id.to_string();
        self.run(move |db| {
            let row = part_messages::Entity::find()
                .filter(part_messages::Column::PartId.eq(&part_id))
                .one(db)?;
            Ok(row.map(|r| r.message_id as u64))
        })
        .await
    }

    pub async fn record_part_message(
        &self,
        part_id: &str,
        message_id: u64,
        thread_id: u64,
    ) -> Result<()> {
        let part_id = part_id.to_string();
        self.run(move |db| {
            let record = part_messages::ActiveModel {
                rowid: NotSet,
                part_id: Set(part_id),
                message_id: Set(message_id as i64),
                thread_id: Set(thread_id as i64),
                created_at: Set(now_millis()),
            };
            part_messages::Entity::insert(record)
                .on_conflict(
                    OnConflict::column(part_messages::Column::PartId)
                        .update_columns([
                            part_messages::Column::MessageId,
                            part_messages::Column::ThreadId,
                        ])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }

    pub async fn part_ids_for_thread(&self, thread_id: u64) -> Result<Vec<String>> {
        self.run(move |db| {
            let rows = part_messages::Entity::find()
                .filter(part_messages::Column::ThreadId.eq(thread_id as i64))
                .all(db)?;
            Ok(rows.into_iter().map(|r| r.part_id).collect())
        })
        .await
    }

    // ── bot credentials ─────────────────────────────────────────────

    pub async fn bot_token(&self, app_id: &str) -> Result<Option<String>> {
        let app_id = app_id.to_string();
        self.run(move |db| {
            let row = bot_tokens::Entity::find()
                .filter(bot_tokens::Column::AppId.eq(&app_id))
                .one(db)?;
            Ok(row.map(|r| r.token))
        })
        .await
    }

    pub async fn latest_bot_token(&self) -> Result<Option<(String, String)>> {
        self.run(move |db| {
            let row = bot_tokens::Entity::find()
                .order_by_desc(bot_tokens::Column::CreatedAt)
                .one(db)?;
            Ok(row.map(|r| (r.app_id, r.token)))
        })
        .await
    }

    pub async fn set_bot_token(&self, app_id: &str, token: &str) -> Result<()> {
        let app_id = app_id.to_string();
        let token = token.to_string();
        self.run(move |db| {
            let record = bot_tokens::ActiveModel {
                rowid: NotSet,
                app_id: Set(app_id),
                token: Set(token),
                created_at: Set(now_millis()),
            };
            bot_tokens::Entity::insert(record)
                .on_conflict(
                    OnConflict::column(bot_tokens::Column::AppId)
                        .update_columns([bot_tokens::Column::Token, bot_tokens::Column::CreatedAt])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }

    // ── channel → directory ─────────────────────────────────────────

    pub async fn channel_directory(&self, channel_id: u64) -> Result<Option<ChannelBinding>> {
        self.run(move |db| {
            let row = channel_directories::Entity::find()
                .filter(channel_directories::Column::ChannelId.eq(channel_id as i64))
                .one(db)?;
            Ok(row.map(|r| ChannelBinding {
                channel_id,
                directory: r.directory,
                kind: ChannelKind::parse(&r.channel_type),
            }))
        })
        .await
    }

    pub async fn bind_channel_directory(
        &self,
        channel_id: u64,
        directory: &str,
        kind: ChannelKind,
    ) -> Result<()> {
        let directory = directory.to_string();
        self.run(move |db| {
            let record = channel_directories::ActiveModel {
                rowid: NotSet,
                channel_id: Set(channel_id as i64),
                directory: Set(directory),
                channel_type: Set(kind.as_str().to_string()),
                created_at: Set(now_millis()),
            };
            channel_directories::Entity::insert(record)
                .on_conflict(
                    OnConflict::column(channel_directories::Column::ChannelId)
                        .update_columns([
                            channel_directories::Column::Directory,
                            channel_directories::Column::ChannelType,
                            channel_directories::Column::CreatedAt,
                        ])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }

    pub async fn unbind_channel_directory(&self, channel_id: u64) -> Result<()> {
        self.run(move |db| {
            channel_directories::Entity::delete_many()
                .filter(channel_directories::Column::ChannelId.eq(channel_id as i64))
                .exec(db)?;
            Ok(())
        })
        .await
    }

    pub async fn all_channel_directories(&self) -> Result<Vec<ChannelBinding>> {
        self.run(move |db| {
            let rows = channel_directories::Entity::find().all(db)?;
            Ok(rows
                .into_iter()
                .map(|r| ChannelBinding {
                    channel_id: r.channel_id as u64,
                    directory: r.directory,
                    kind: ChannelKind::parse(&r.channel_type),
                })
                .collect())
        })
        .await
    }

    // ── provider API keys ───────────────────────────────────────────

    pub async fn api_keys(&self, app_id: &str) -> Result<Option<(String, Option<String>)>> {
        let app_id = app_id.to_string();
        self.run(move |db| {
            let row = bot_api_keys::Entity::find()
                .filter(bot_api_keys::Column::AppId.eq(&app_id))
                .one(db)?;
            Ok(row.map(|r| (r.primary_key, r.fallback_key)))
        })
        .await
    }

    pub async fn set_api_keys(
        &self,
        app_id: &str,
        primary: &str,
        fallback: Option<&str>,
    ) -> Result<()> {
        let app_id = app_id.to_string();
        let primary = primary.to_string();
        let fallback = fallback.map(String::from);
        self.run(move |db| {
            let record = bot_api_keys::ActiveModel {
                rowid: NotSet,
                app_id: Set(app_id),
                primary_key: Set(primary),
                fallback_key: Set(fallback),
                created_at: Set(now_millis()),
            };
            bot_api_keys::Entity::insert(record)
                .on_conflict(
                    OnConflict::column(bot_api_keys::Column::AppId)
                        .update_columns([
                            bot_api_keys::Column::PrimaryKey,
                            bot_api_keys::Column::FallbackKey,
                            bot_api_keys::Column::CreatedAt,
                        ])
                        .to_owned(),
                )
                .exec(db)?;
            Ok(())
        })
        .await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn thread_session_round_trip() {
        let (store, _dir) = store().await;

        assert_eq!(store.thread_session(1).await.unwrap(), None);
        store.bind_thread_session(1, "ses_a").await.unwrap();
        assert_eq!(store.thread_session(1).await.unwrap().as_deref(), Some("ses_a"));

        // upsert replaces the binding
        store.bind_thread_session(1, "ses_b").await.unwrap();
        assert_eq!(store.thread_session(1).await.unwrap().as_deref(), Some("ses_b"));

        store.unbind_thread_session(1).await.unwrap();
        assert_eq!(store.thread_session(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn part_message_dedupe_key() {
        let (store, _dir) = store().await;

        assert_eq!(store.part_message("prt_1").await.unwrap(), None);
        store.record_part_message("prt_1", 42, 7).await.unwrap();
        assert_eq!(store.part_message("prt_1").await.unwrap(), Some(42));

        store.record_part_message("prt_2", 43, 7).await.unwrap();
        let mut ids = store.part_ids_for_thread(7).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["prt_1", "prt_2"]);
    }

    #[tokio::test]
    async fn channel_directory_round_trip() {
        let (store, _dir) = store().await;

        store
            .bind_channel_directory(10, "/home/dev/proj", ChannelKind::Text)
            .await
            .unwrap();
        store
            .bind_channel_directory(11, "/home/dev/proj", ChannelKind::Voice)
            .await
            .unwrap();

        let binding = store.channel_directory(10).await.unwrap().unwrap();
        assert_eq!(binding.directory, "/home/dev/proj");
        assert_eq!(binding.kind, ChannelKind::Text);

        assert_eq!(store.all_channel_directories().await.unwrap().len(), 2);

        store.unbind_channel_directory(10).await.unwrap();
        assert!(store.channel_directory(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn credentials_round_trip() {
        let (store, _dir) = store().await;

        store.set_bot_token("app1", "tok1").await.unwrap();
        assert_eq!(store.bot_token("app1").await.unwrap().as_deref(), Some("tok1"));

        let (app, token) = store.latest_bot_token().await.unwrap().unwrap();
        assert_eq!((app.as_str(), token.as_str()), ("app1", "tok1"));

        store.set_api_keys("app1", "pk", Some("fb")).await.unwrap();
        let (primary, fallback) = store.api_keys("app1").await.unwrap().unwrap();
        assert_eq!(primary, "pk");
        assert_eq!(fallback.as_deref(), Some("fb"));

        assert!(store.api_keys("other").await.unwrap().is_none());
    }
}
