use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{ConnectPolicy, establish_connection, ping},
    error::{MongoDaoError, MongoResult},
    models::{
        CONFIG_COLLECTION, MongoConfigDocument, MongoPressDocument, MongoRegistrationDocument,
        MongoSessionDocument, PRESS_COLLECTION, REGISTRATION_COLLECTION, SESSION_COLLECTION,
        doc_id,
    },
};
use crate::dao::{
    models::{ButtonPressEntity, RegistrationEntity, SessionConfigEntity, SessionEntity},
    session_store::SessionStore,
    storage::StorageResult,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB implementation of [`SessionStore`].
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        ping(&database).await
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (_client, database) = establish_connection(
            &self.config.options,
            &self.config.database_name,
            ConnectPolicy::RECONNECT,
        )
        .await?;
        *self.database.write().await = database;
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY
    )
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (_client, database) = establish_connection(
            &config.options,
            &config.database_name,
            ConnectPolicy::STARTUP,
        )
        .await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes = [
            (
                SESSION_COLLECTION,
                "community_id,scheduled_at",
                doc! {"community_id": 1, "scheduled_at": 1},
                false,
            ),
            (
                REGISTRATION_COLLECTION,
                "session_id,user_id",
                doc! {"session_id": 1, "user_id": 1},
                true,
            ),
            (
                PRESS_COLLECTION,
                "session_id,pressed_at",
                doc! {"session_id": 1, "pressed_at": 1},
                false,
            ),
        ];

        let database = self.database().await;
        for (collection, index, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .unique(Some(unique))
                        .build(),
                )
                .build();
            database
                .collection::<mongodb::bson::Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.database.read().await.clone()
    }

    async fn collection<T: Send + Sync + Serialize + DeserializeOwned>(
        &self,
        name: &str,
    ) -> Collection<T> {
        self.database().await.collection::<T>(name)
    }

    async fn save_config(&self, config: SessionConfigEntity) -> MongoResult<()> {
        let id = config.id;
        let document = MongoConfigDocument::from(config);
        self.collection::<MongoConfigDocument>(CONFIG_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveConfig { id, source })?;
        Ok(())
    }

    async fn find_config(&self, id: Uuid) -> MongoResult<Option<SessionConfigEntity>> {
        self.collection::<MongoConfigDocument>(CONFIG_COLLECTION)
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadConfigs { source })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_configs(&self) -> MongoResult<Vec<SessionConfigEntity>> {
        let documents: Vec<MongoConfigDocument> = self
            .collection(CONFIG_COLLECTION)
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::LoadConfigs { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadConfigs { source })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document = MongoSessionDocument::from(session);
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSessions { source })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn find_sessions(
        &self,
        filter: mongodb::bson::Document,
        sort: mongodb::bson::Document,
        limit: Option<i64>,
    ) -> MongoResult<Vec<SessionEntity>> {
        let collection = self
            .collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await;
        let mut query = collection.find(filter).sort(sort);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        let documents: Vec<MongoSessionDocument> = query
            .await
            .map_err(|source| MongoDaoError::LoadSessions { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadSessions { source })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_score(
        &self,
        id: Uuid,
        current_score: u32,
        final_score: Option<u32>,
    ) -> MongoResult<()> {
        // Matching on a null final score keeps a frozen value untouched.
        let filter = doc! {"_id": id.to_string(), "final_score": null};
        let update = doc! {"$set": {
            "current_score": i64::from(current_score),
            "final_score": final_score.map(i64::from),
        }};
        self.collection::<MongoSessionDocument>(SESSION_COLLECTION)
            .await
            .update_one(filter, update)
            .await
            .map_err(|source| MongoDaoError::RecordScore { id, source })?;
        Ok(())
    }

    async fn insert_registration(&self, registration: RegistrationEntity) -> MongoResult<bool> {
        let (session_id, user_id) = (registration.session_id, registration.user_id);
        let document = MongoRegistrationDocument::from(registration);
        match self
            .collection::<MongoRegistrationDocument>(REGISTRATION_COLLECTION)
            .await
            .insert_one(&document)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_duplicate_key(&err) => Ok(false),
            Err(source) => Err(MongoDaoError::SaveRegistration {
                session_id,
                user_id,
                source,
            }),
        }
    }

    async fn list_registrations(&self, session_id: Uuid) -> MongoResult<Vec<RegistrationEntity>> {
        let documents: Vec<MongoRegistrationDocument> = self
            .collection(REGISTRATION_COLLECTION)
            .await
            .find(doc! {"session_id": session_id.to_string()})
            .sort(doc! {"registered_at": 1})
            .await
            .map_err(|source| MongoDaoError::LoadRegistrations { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadRegistrations { session_id, source })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_press(&self, press: ButtonPressEntity) -> MongoResult<()> {
        let (session_id, user_id) = (press.session_id, press.user_id);
        let document = MongoPressDocument::from(press);
        self.collection::<MongoPressDocument>(PRESS_COLLECTION)
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::AppendPress {
                session_id,
                user_id,
                source,
            })?;
        Ok(())
    }

    async fn list_presses(&self, session_id: Uuid) -> MongoResult<Vec<ButtonPressEntity>> {
        let documents: Vec<MongoPressDocument> = self
            .collection(PRESS_COLLECTION)
            .await
            .find(doc! {"session_id": session_id.to_string()})
            .sort(doc! {"pressed_at": 1, "_id": 1})
            .await
            .map_err(|source| MongoDaoError::LoadPresses { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadPresses { session_id, source })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn save_config(&self, config: SessionConfigEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_config(config).await.map_err(Into::into) })
    }

    fn find_config(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionConfigEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_config(id).await.map_err(Into::into) })
    }

    fn list_configs(&self) -> BoxFuture<'static, StorageResult<Vec<SessionConfigEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_configs().await.map_err(Into::into) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn list_unfinished_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_sessions(doc! {"final_score": null}, doc! {"scheduled_at": 1}, None)
                .await
                .map_err(Into::into)
        })
    }

    fn list_community_sessions(
        &self,
        community_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_sessions(
                    doc! {"community_id": community_id.to_string()},
                    doc! {"scheduled_at": 1},
                    None,
                )
                .await
                .map_err(Into::into)
        })
    }

    fn record_score(
        &self,
        session_id: Uuid,
        current_score: u32,
        final_score: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_score(session_id, current_score, final_score)
                .await
                .map_err(Into::into)
        })
    }

    fn list_final_scores(
        &self,
        community_id: Option<Uuid>,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut filter = doc! {"final_score": {"$ne": null}};
            if let Some(community_id) = community_id {
                filter.insert("community_id", community_id.to_string());
            }
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            store
                .find_sessions(filter, doc! {"ends_at": -1}, Some(limit))
                .await
                .map_err(Into::into)
        })
    }

    fn insert_registration(
        &self,
        registration: RegistrationEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert_registration(registration)
                .await
                .map_err(Into::into)
        })
    }

    fn list_registrations(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<RegistrationEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_registrations(session_id).await.map_err(Into::into) })
    }

    fn append_press(&self, press: ButtonPressEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_press(press).await.map_err(Into::into) })
    }

    fn list_presses(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ButtonPressEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_presses(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
