use crate::database::{from_timestamp, peers, query_error, to_timestamp, with_connection, SqlitePool};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use domain::{DomainError, Peer, PeerRepository};

#[derive(Queryable, Selectable, AsChangeset, Debug)]
#[diesel(table_name = peers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct PeerModel {
    id: i32,
    peer_id: String,
    user_id: Option<i32>,
    ip: String,
    port: i32,
    last_seen: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = peers)]
struct NewPeerModel {
    peer_id: String,
    user_id: Option<i32>,
    ip: String,
    port: i32,
    last_seen: NaiveDateTime,
}

impl From<PeerModel> for Peer {
    fn from(model: PeerModel) -> Self {
        Peer {
            id: Some(model.id),
            peer_id: model.peer_id,
            user_id: model.user_id,
            ip: model.ip,
            port: model.port as u16,
            last_seen: from_timestamp(model.last_seen),
        }
    }
}

impl From<&Peer> for NewPeerModel {
    fn from(peer: &Peer) -> Self {
        NewPeerModel {
            peer_id: peer.peer_id.clone(),
            user_id: peer.user_id,
            ip: peer.ip.clone(),
            port: peer.port as i32,
            last_seen: to_timestamp(peer.last_seen),
        }
    }
}

pub struct SqlitePeerRepository {
    pool: SqlitePool,
}

impl SqlitePeerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeerRepository for SqlitePeerRepository {
    async fn find_by_peer_id(&self, peer_id: &str) -> Result<Option<Peer>, DomainError> {
        let peer_id = peer_id.to_string();
        let result = with_connection(&self.pool, move |conn| {
            peers::table
                .filter(peers::peer_id.eq(peer_id))
                .select(PeerModel::as_select())
                .first::<PeerModel>(conn)
                .optional()
                .map_err(query_error)
        })
        .await?;

        Ok(result.map(Peer::from))
    }

    async fn find_by_ids(&self, ids: &[i32]) -> Result<Vec<Peer>, DomainError> {
        let ids = ids.to_vec();
        let result = with_connection(&self.pool, move |conn| {
            peers::table
                .filter(peers::id.eq_any(ids))
                .order(peers::peer_id.asc())
                .select(PeerModel::as_select())
                .load::<PeerModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into_iter().map(Peer::from).collect())
    }

    async fn save(&self, peer: &Peer) -> Result<Peer, DomainError> {
        let new_peer = NewPeerModel::from(peer);

        let result = with_connection(&self.pool, move |conn| {
            diesel::insert_into(peers::table)
                .values(&new_peer)
                .execute(conn)
                .map_err(query_error)?;

            peers::table
                .filter(peers::peer_id.eq(&new_peer.peer_id))
                .select(PeerModel::as_select())
                .first::<PeerModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into())
    }

    async fn update(&self, peer: &Peer) -> Result<Peer, DomainError> {
        let id = peer.id.ok_or_else(|| {
            DomainError::ValidationError("Peer ID is required for updates".to_string())
        })?;
        let changes = PeerModel {
            id,
            peer_id: peer.peer_id.clone(),
            user_id: peer.user_id,
            ip: peer.ip.clone(),
            port: peer.port as i32,
            last_seen: to_timestamp(peer.last_seen),
        };

        let result = with_connection(&self.pool, move |conn| {
            diesel::update(peers::table.filter(peers::id.eq(id)))
                .set(&changes)
                .execute(conn)
                .map_err(query_error)?;

            peers::table
                .filter(peers::id.eq(id))
                .select(PeerModel::as_select())
                .first::<PeerModel>(conn)
                .map_err(query_error)
        })
        .await?;

        Ok(result.into())
    }
}
