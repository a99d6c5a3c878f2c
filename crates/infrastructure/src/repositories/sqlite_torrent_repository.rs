use crate::database::{from_timestamp, query_error, to_timestamp, torrent_files, torrents, with_connection, SqlitePool};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use domain::{DomainError, Torrent, TorrentFile, TorrentRepository};

// Database model - separate from domain entity
#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = torrents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct TorrentModel {
    id: i32,
    info_hash: String,
    name: String,
    total_size: i64,
    piece_length: i32,
    piece_hashes: String,
    created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = torrents)]
struct NewTorrentModel {
    info_hash: String,
    name: String,
    total_size: i64,
    piece_length: i32,
    piece_hashes: String,
    created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = torrent_files)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct TorrentFileModel {
    id: i32,
    torrent_id: i32,
    path: String,
    length: i64,
    offset: i64,
}

#[derive(Insertable)]
#[diesel(table_name = torrent_files)]
struct NewTorrentFileModel {
    torrent_id: i32,
    path: String,
    length: i64,
    offset: i64,
}

impl TryFrom<TorrentModel> for Torrent {
    type Error = DomainError;

    fn try_from(model: TorrentModel) -> Result<Self, Self::Error> {
        let piece_hashes: Vec<String> = serde_json::from_str(&model.piece_hashes)
            .map_err(|e| DomainError::RepositoryError(format!("Corrupt piece_hashes for {}: {}", model.info_hash, e)))?;

        Ok(Torrent {
            id: Some(model.id),
            info_hash: model.info_hash,
            name: model.name,
            total_size: model.total_size,
            piece_length: model.piece_length,
            piece_hashes,
            created_at: from_timestamp(model.created_at),
        })
    }
}

impl TryFrom<&Torrent> for NewTorrentModel {
    type Error = DomainError;

    fn try_from(torrent: &Torrent) -> Result<Self, Self::Error> {
        Ok(NewTorrentModel {
            info_hash: torrent.info_hash.clone(),
            name: torrent.name.clone(),
            total_size: torrent.total_size,
            piece_length: torrent.piece_length,
            piece_hashes: serde_json::to_string(&torrent.piece_hashes)
                .map_err(|e| DomainError::RepositoryError(e.to_string()))?,
            created_at: to_timestamp(torrent.created_at),
        })
    }
}

impl From<TorrentFileModel> for TorrentFile {
    fn from(model: TorrentFileModel) -> Self {
        TorrentFile {
            id: Some(model.id),
            torrent_id: model.torrent_id,
            path: model.path,
            length: model.length,
            offset: model.offset,
        }
    }
}

impl From<&TorrentFile> for NewTorrentFileModel {
    fn from(file: &TorrentFile) -> Self {
        NewTorrentFileModel {
            torrent_id: file.torrent_id,
            path: file.path.clone(),
            length: file.length,
            offset: file.offset,
        }
    }
}

pub struct SqliteTorrentRepository {
    pool: SqlitePool,
}

impl SqliteTorrentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TorrentRepository for SqliteTorrentRepository {
    async fn find_by_id(&self, id: i32) -> Result<Option<Torrent>, DomainError> {
        let result = with_connection(&self.pool, move |conn| {
            torrents::table
                .filter(torrents::id.eq(id))
                .select(TorrentModel::as_select())
                .first::<TorrentModel>(conn)
                .optional()
                .map_err(query_error)
        })
        .await?;

        result.map(Torrent::try_from).transpose()
    }

    async fn find_by_info_hash(&self, info_hash: &str) -> Result<Option<Torrent>, DomainError> {
        let info_hash = info_hash.to_string();
        let result = with_connection(&self.pool, move |conn| {
            torrents::table
                .filter(torrents::info_hash.eq(info_hash))
                .select(TorrentModel::as_select())
                .first::<TorrentModel>(conn)
                .optional()
                .map_err(query_error)
        })
        .await?;

        result.map(Torrent::try_from).transpose()
    }

    async fn create(
        &self,
        torrent: &Torrent,
        files: &[TorrentFile],
    ) -> Result<(Torrent, Vec<TorrentFile>), DomainError> {
        let new_torrent = NewTorrentModel::try_from(torrent)?;
        let mut new_files: Vec<NewTorrentFileModel> = files.iter().map(NewTorrentFileModel::from).collect();

        let (torrent_row, file_rows) = with_connection(&self.pool, move |conn| {
            conn.transaction(|conn| {
                diesel::insert_into(torrents::table)
                    .values(&new_torrent)
                    .execute(conn)?;

                // info_hash is unique, so this is the row just inserted
                let torrent_row = torrents::table
                    .filter(torrents::info_hash.eq(&new_torrent.info_hash))
                    .select(TorrentModel::as_select())
                    .first::<TorrentModel>(conn)?;

                for file in &mut new_files {
                    file.torrent_id = torrent_row.id;
                }
                if !new_files.is_empty() {
                    diesel::insert_into(torrent_files::table)
                        .values(&new_files)
                        .execute(conn)?;
                }

                let file_rows = torrent_files::table
                    .filter(torrent_files::torrent_id.eq(torrent_row.id))
                    .order((torrent_files::offset.asc(), torrent_files::id.asc()))
                    .select(TorrentFileModel::as_select())
                    .load::<TorrentFileModel>(conn)?;

                Ok::<_, diesel::result::Error>((torrent_row, file_rows))
            })
            .map_err(query_error)
        })
        .await?;

        Ok((
            Torrent::try_from(torrent_row)?,
            file_rows.into_iter().map(TorrentFile::from).collect(),
        ))
    }

    async fn find_files(&self, torrent_id: i32) -> Result<Vec<TorrentFile>, DomainError> {
        let result = with_connection(&self.pool, move |conn| {
            torrent_files::table
                .filter(torrent_files::torrent_id.eq(torrent_id))
                .order((torrent_files::offset.asc(), torrent_files::id.asc()))
                .select(TorrentFileModel::as_select())
                .load::<TorrentFileModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into_iter().map(TorrentFile::from).collect())
    }
}
