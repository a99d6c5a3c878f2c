use crate::database::{from_timestamp, peer_files, query_error, to_timestamp, with_connection, SqlitePool};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use domain::{DomainError, PeerFile, PeerFileRepository, PeerStatus};

#[derive(Queryable, Selectable, AsChangeset, Debug)]
#[diesel(table_name = peer_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct PeerFileModel {
    id: i32,
    peer_id: i32,
    file_id: i32,
    status: String,
    uploaded: i64,
    downloaded: i64,
    left: i64,
    updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = peer_files)]
struct NewPeerFileModel {
    peer_id: i32,
    file_id: i32,
    status: String,
    uploaded: i64,
    downloaded: i64,
    left: i64,
    updated_at: NaiveDateTime,
}

impl TryFrom<PeerFileModel> for PeerFile {
    type Error = DomainError;

    fn try_from(model: PeerFileModel) -> Result<Self, Self::Error> {
        Ok(PeerFile {
            id: Some(model.id),
            peer_id: model.peer_id,
            file_id: model.file_id,
            status: model.status.parse::<PeerStatus>()?,
            uploaded: model.uploaded,
            downloaded: model.downloaded,
            left: model.left,
            updated_at: from_timestamp(model.updated_at),
        })
    }
}

impl From<&PeerFile> for NewPeerFileModel {
    fn from(row: &PeerFile) -> Self {
        NewPeerFileModel {
            peer_id: row.peer_id,
            file_id: row.file_id,
            status: row.status.as_str().to_string(),
            uploaded: row.uploaded,
            downloaded: row.downloaded,
            left: row.left,
            updated_at: to_timestamp(row.updated_at),
        }
    }
}

pub struct SqlitePeerFileRepository {
    pool: SqlitePool,
}

impl SqlitePeerFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeerFileRepository for SqlitePeerFileRepository {
    async fn find(&self, peer_id: i32, file_id: i32) -> Result<Option<PeerFile>, DomainError> {
        let result = with_connection(&self.pool, move |conn| {
            peer_files::table
                .filter(peer_files::peer_id.eq(peer_id))
                .filter(peer_files::file_id.eq(file_id))
                .select(PeerFileModel::as_select())
                .first::<PeerFileModel>(conn)
                .optional()
                .map_err(query_error)
        })
        .await?;

        result.map(PeerFile::try_from).transpose()
    }

    async fn find_by_file_ids(&self, file_ids: &[i32]) -> Result<Vec<PeerFile>, DomainError> {
        let file_ids = file_ids.to_vec();
        let result = with_connection(&self.pool, move |conn| {
            peer_files::table
                .filter(peer_files::file_id.eq_any(file_ids))
                .select(PeerFileModel::as_select())
                .load::<PeerFileModel>(conn)
                .map_err(query_error)
        })
        .await?;

        result.into_iter().map(PeerFile::try_from).collect()
    }

    async fn save(&self, row: &PeerFile) -> Result<PeerFile, DomainError> {
        let new_row = NewPeerFileModel::from(row);

        let result = with_connection(&self.pool, move |conn| {
            diesel::insert_into(peer_files::table)
                .values(&new_row)
                .execute(conn)
                .map_err(query_error)?;

            // (peer_id, file_id) is unique
            peer_files::table
                .filter(peer_files::peer_id.eq(new_row.peer_id))
                .filter(peer_files::file_id.eq(new_row.file_id))
                .select(PeerFileModel::as_select())
                .first::<PeerFileModel>(conn)
                .map_err(query_error)
        })
        .await?;

        PeerFile::try_from(result)
    }

    async fn update(&self, row: &PeerFile) -> Result<PeerFile, DomainError> {
        let id = row.id.ok_or_else(|| {
            DomainError::ValidationError("PeerFile ID is required for updates".to_string())
        })?;
        let new_row = NewPeerFileModel::from(row);
        let changes = PeerFileModel {
            id,
            peer_id: new_row.peer_id,
            file_id: new_row.file_id,
            status: new_row.status,
            uploaded: new_row.uploaded,
            downloaded: new_row.downloaded,
            left: new_row.left,
            updated_at: new_row.updated_at,
        };

        let result = with_connection(&self.pool, move |conn| {
            diesel::update(peer_files::table.filter(peer_files::id.eq(id)))
                .set(&changes)
                .execute(conn)
                .map_err(query_error)?;

            peer_files::table
                .filter(peer_files::id.eq(id))
                .select(PeerFileModel::as_select())
                .first::<PeerFileModel>(conn)
                .map_err(query_error)
        })
        .await?;

        PeerFile::try_from(result)
    }
}
