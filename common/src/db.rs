// Typed client for the database service.
//
// One request/reply exchange per call over a single framed TCP connection.
// The connection is not reentrant: each connection worker constructs its own
// client and the DB service sees a pool sized by the number of active
// clients.

use crate::codec::{self, CodecError};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

// The DB runs next to the services, so replies are expected quickly.
pub const DB_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub type Row = Vec<Value>;

#[derive(Debug, Error)]
pub enum DbError {
    /// The database rejected the statement; carries the server's message.
    #[error("{0}")]
    Server(String),
    /// No reply within [`DB_REQUEST_TIMEOUT`].
    #[error("database request timed out")]
    Timeout,
    /// The reply did not match the `{status, data|error}` contract.
    #[error("database protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn col(row: &[Value], idx: usize) -> Result<&Value, DbError> {
    row.get(idx)
        .ok_or_else(|| DbError::Protocol(format!("row is missing column {idx}")))
}

fn col_i64(row: &[Value], idx: usize) -> Result<i64, DbError> {
    col(row, idx)?
        .as_i64()
        .ok_or_else(|| DbError::Protocol(format!("column {idx} is not an integer")))
}

fn col_str(row: &[Value], idx: usize) -> Result<String, DbError> {
    Ok(col(row, idx)?.as_str().unwrap_or_default().to_string())
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub status: String,
    pub role: String,
}

impl UserRow {
    fn from_row(row: &[Value]) -> Result<Self, DbError> {
        Ok(Self {
            id: col_i64(row, 0)?,
            name: col_str(row, 1)?,
            password_hash: col_str(row, 2)?,
            status: col_str(row, 3)?,
            role: col_str(row, 4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: i64,
    pub name: String,
    pub host_user_id: i64,
    pub visibility: String,
    pub status: String,
    pub game_id: i64,
}

impl RoomRow {
    fn from_row(row: &[Value]) -> Result<Self, DbError> {
        Ok(Self {
            id: col_i64(row, 0)?,
            name: col_str(row, 1)?,
            host_user_id: col_i64(row, 2)?,
            visibility: col_str(row, 3)?,
            status: col_str(row, 4)?,
            game_id: col_i64(row, 5)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GameRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner_id: i64,
    pub latest_version: String,
}

impl GameRow {
    fn from_row(row: &[Value]) -> Result<Self, DbError> {
        Ok(Self {
            id: col_i64(row, 0)?,
            name: col_str(row, 1)?,
            description: col_str(row, 2)?,
            owner_id: col_i64(row, 3)?,
            latest_version: col_str(row, 4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VersionRow {
    pub id: i64,
    pub game_id: i64,
    pub version: String,
    pub command: String,
    pub upload_date: String,
}

impl VersionRow {
    fn from_row(row: &[Value]) -> Result<Self, DbError> {
        Ok(Self {
            id: col_i64(row, 0)?,
            game_id: col_i64(row, 1)?,
            version: col_str(row, 2)?,
            command: col_str(row, 3)?,
            upload_date: col_str(row, 4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct InviteRow {
    pub id: i64,
    pub room_id: i64,
    pub from_id: i64,
    pub to_id: i64,
}

impl InviteRow {
    fn from_row(row: &[Value]) -> Result<Self, DbError> {
        Ok(Self {
            id: col_i64(row, 0)?,
            room_id: col_i64(row, 1)?,
            from_id: col_i64(row, 2)?,
            to_id: col_i64(row, 3)?,
        })
    }
}

/// One pending invite as shown to the invitee, with room and game metadata.
#[derive(Debug, Clone)]
pub struct InviteListing {
    pub invite_id: i64,
    pub room_id: i64,
    pub from_id: i64,
    pub from_name: String,
    pub room_name: String,
    pub game_id: i64,
    pub game_name: String,
}

/// One pending join request as shown to the room host.
#[derive(Debug, Clone)]
pub struct RequestListing {
    pub request_id: i64,
    pub room_id: i64,
    pub from_id: i64,
    pub from_name: String,
}

/// One public room as shown in the lobby browser.
#[derive(Debug, Clone)]
pub struct RoomListing {
    pub room_id: i64,
    pub name: String,
    pub host_id: i64,
    pub status: String,
    pub game_id: i64,
    pub game_name: String,
}

#[derive(Debug, Clone)]
pub struct CommentListing {
    pub id: i64,
    pub user: String,
    pub content: String,
    pub score: i64,
    pub timestamp: String,
}

pub struct DatabaseClient {
    stream: TcpStream,
}

impl DatabaseClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self, DbError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(CodecError::Io)?;
        Ok(Self { stream })
    }

    async fn request(&mut self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, DbError> {
        codec::send_json(&mut self.stream, json!({"sql": sql, "params": params})).await?;

        let reply = codec::recv_json(&mut self.stream, Some(DB_REQUEST_TIMEOUT))
            .await?
            .ok_or(DbError::Timeout)?;

        match reply.get("status").and_then(Value::as_str) {
            Some("ok") => {
                let data = reply
                    .get("data")
                    .and_then(Value::as_array)
                    .ok_or_else(|| DbError::Protocol("ok reply without data rows".to_string()))?;
                data.iter()
                    .map(|row| {
                        row.as_array().cloned().ok_or_else(|| {
                            DbError::Protocol("data row is not a tuple".to_string())
                        })
                    })
                    .collect()
            }
            Some("error") => {
                let message = reply
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown database error");
                Err(DbError::Server(message.to_string()))
            }
            _ => Err(DbError::Protocol("reply has no status field".to_string())),
        }
    }

    async fn returned_id(&mut self, sql: &str, params: Vec<Value>) -> Result<i64, DbError> {
        let rows = self.request(sql, params).await?;
        let row = rows
            .first()
            .ok_or_else(|| DbError::Protocol("RETURNING produced no row".to_string()))?;
        col_i64(row, 0)
    }

    // --- users ---

    pub async fn find_user_by_name(&mut self, name: &str) -> Result<Option<UserRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, passwordHash, status, role FROM User WHERE name = ? LIMIT 1",
                vec![json!(name)],
            )
            .await?;
        rows.first().map(|r| UserRow::from_row(r)).transpose()
    }

    pub async fn find_user_by_name_and_password(
        &mut self,
        name: &str,
        password_hash: &str,
    ) -> Result<Option<UserRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, passwordHash, status, role FROM User \
                 WHERE name = ? AND passwordHash = ? LIMIT 1",
                vec![json!(name), json!(password_hash)],
            )
            .await?;
        rows.first().map(|r| UserRow::from_row(r)).transpose()
    }

    pub async fn find_user_by_id(&mut self, user_id: i64) -> Result<Option<UserRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, passwordHash, status, role FROM User WHERE id = ? LIMIT 1",
                vec![json!(user_id)],
            )
            .await?;
        rows.first().map(|r| UserRow::from_row(r)).transpose()
    }

    pub async fn insert_user(
        &mut self,
        name: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<i64, DbError> {
        self.returned_id(
            "INSERT INTO User (name, passwordHash, role) VALUES (?, ?, ?) RETURNING id",
            vec![json!(name), json!(password_hash), json!(role)],
        )
        .await
    }

    pub async fn update_user_status(&mut self, user_id: i64, status: &str) -> Result<(), DbError> {
        self.request(
            "UPDATE User SET status = ? WHERE id = ?",
            vec![json!(status), json!(user_id)],
        )
        .await?;
        Ok(())
    }

    /// Online users excluding developer accounts.
    pub async fn list_online_players(&mut self) -> Result<Vec<(i64, String)>, DbError> {
        let rows = self
            .request(
                "SELECT id, name FROM User WHERE status = 'online' AND role != 'developer'",
                vec![],
            )
            .await?;
        rows.iter()
            .map(|r| Ok((col_i64(r, 0)?, col_str(r, 1)?)))
            .collect()
    }

    // --- rooms ---

    /// Creates the room in state `idle` and adds the host as first member.
    pub async fn create_room(
        &mut self,
        name: &str,
        host_user_id: i64,
        visibility: &str,
        game_id: i64,
    ) -> Result<i64, DbError> {
        let room_id = self
            .returned_id(
                "INSERT INTO Room (name, hostUserId, visibility, status, gameId) \
                 VALUES (?, ?, ?, 'idle', ?) RETURNING id",
                vec![json!(name), json!(host_user_id), json!(visibility), json!(game_id)],
            )
            .await?;
        self.request(
            "INSERT INTO in_room (roomId, userId) VALUES (?, ?)",
            vec![json!(room_id), json!(host_user_id)],
        )
        .await?;
        Ok(room_id)
    }

    pub async fn room_of_user(&mut self, user_id: i64) -> Result<Option<i64>, DbError> {
        let rows = self
            .request(
                "SELECT roomId FROM in_room WHERE userId = ?",
                vec![json!(user_id)],
            )
            .await?;
        rows.first().map(|r| col_i64(r, 0)).transpose()
    }

    /// Drops every membership of the user, returning the rooms left.
    pub async fn leave_room(&mut self, user_id: i64) -> Result<Vec<i64>, DbError> {
        let rows = self
            .request(
                "DELETE FROM in_room WHERE userId = ? RETURNING roomId",
                vec![json!(user_id)],
            )
            .await?;
        rows.iter().map(|r| col_i64(r, 0)).collect()
    }

    pub async fn room_members(&mut self, room_id: i64) -> Result<Vec<(i64, String)>, DbError> {
        let rows = self
            .request(
                "SELECT U.id, U.name FROM in_room AS I JOIN User AS U ON I.userId = U.id \
                 WHERE I.roomId = ?",
                vec![json!(room_id)],
            )
            .await?;
        rows.iter()
            .map(|r| Ok((col_i64(r, 0)?, col_str(r, 1)?)))
            .collect()
    }

    pub async fn add_user_to_room(&mut self, room_id: i64, user_id: i64) -> Result<(), DbError> {
        self.request(
            "INSERT INTO in_room (roomId, userId) VALUES (?, ?)",
            vec![json!(room_id), json!(user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn delete_room(&mut self, room_id: i64) -> Result<(), DbError> {
        self.request("DELETE FROM Room WHERE id = ?", vec![json!(room_id)])
            .await?;
        Ok(())
    }

    /// Deletes every room the user hosts, cascading memberships.
    pub async fn delete_rooms_by_host(&mut self, host_user_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM in_room WHERE roomId IN (SELECT id FROM Room WHERE hostUserId = ?)",
            vec![json!(host_user_id)],
        )
        .await?;
        self.request(
            "DELETE FROM Room WHERE hostUserId = ?",
            vec![json!(host_user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn room_by_id(
        &mut self,
        room_id: i64,
        visibility: Option<&str>,
    ) -> Result<Option<RoomRow>, DbError> {
        let rows = match visibility {
            Some(v) => {
                self.request(
                    "SELECT id, name, hostUserId, visibility, status, gameId FROM Room \
                     WHERE id = ? AND visibility = ?",
                    vec![json!(room_id), json!(v)],
                )
                .await?
            }
            None => {
                self.request(
                    "SELECT id, name, hostUserId, visibility, status, gameId FROM Room \
                     WHERE id = ?",
                    vec![json!(room_id)],
                )
                .await?
            }
        };
        rows.first().map(|r| RoomRow::from_row(r)).transpose()
    }

    pub async fn set_room_status(&mut self, room_id: i64, status: &str) -> Result<(), DbError> {
        self.request(
            "UPDATE Room SET status = ? WHERE id = ?",
            vec![json!(status), json!(room_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn list_public_rooms(&mut self) -> Result<Vec<RoomListing>, DbError> {
        let rows = self
            .request(
                "SELECT R.id, R.name, R.hostUserId, R.status, R.gameId, G.name \
                 FROM Room R JOIN Game G ON R.gameId = G.id WHERE R.visibility = 'public'",
                vec![],
            )
            .await?;
        rows.iter()
            .map(|r| {
                Ok(RoomListing {
                    room_id: col_i64(r, 0)?,
                    name: col_str(r, 1)?,
                    host_id: col_i64(r, 2)?,
                    status: col_str(r, 3)?,
                    game_id: col_i64(r, 4)?,
                    game_name: col_str(r, 5)?,
                })
            })
            .collect()
    }

    // --- invites ---

    pub async fn add_invite(
        &mut self,
        room_id: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<i64, DbError> {
        self.returned_id(
            "INSERT INTO invite_list (roomId, fromId, toId) VALUES (?, ?, ?) RETURNING id",
            vec![json!(room_id), json!(from_id), json!(to_id)],
        )
        .await
    }

    pub async fn invite_by_id(&mut self, invite_id: i64) -> Result<Option<InviteRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, roomId, fromId, toId FROM invite_list WHERE id = ?",
                vec![json!(invite_id)],
            )
            .await?;
        rows.first().map(|r| InviteRow::from_row(r)).transpose()
    }

    pub async fn remove_invite(&mut self, invite_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM invite_list WHERE id = ?",
            vec![json!(invite_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_invites_to(&mut self, user_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM invite_list WHERE toId = ?",
            vec![json!(user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_invites_from(&mut self, user_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM invite_list WHERE fromId = ?",
            vec![json!(user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn list_invites_for(&mut self, user_id: i64) -> Result<Vec<InviteListing>, DbError> {
        let rows = self
            .request(
                "SELECT I.id, I.roomId, I.fromId, U.name, R.name, R.gameId, G.name \
                 FROM invite_list AS I \
                 JOIN User AS U ON I.fromId = U.id \
                 JOIN Room AS R ON I.roomId = R.id \
                 JOIN Game AS G ON R.gameId = G.id \
                 WHERE I.toId = ?",
                vec![json!(user_id)],
            )
            .await?;
        rows.iter()
            .map(|r| {
                Ok(InviteListing {
                    invite_id: col_i64(r, 0)?,
                    room_id: col_i64(r, 1)?,
                    from_id: col_i64(r, 2)?,
                    from_name: col_str(r, 3)?,
                    room_name: col_str(r, 4)?,
                    game_id: col_i64(r, 5)?,
                    game_name: col_str(r, 6)?,
                })
            })
            .collect()
    }

    // --- join requests ---

    pub async fn add_join_request(
        &mut self,
        room_id: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<i64, DbError> {
        self.returned_id(
            "INSERT INTO request_join_list (roomId, fromId, toId) VALUES (?, ?, ?) RETURNING id",
            vec![json!(room_id), json!(from_id), json!(to_id)],
        )
        .await
    }

    /// The host filter doubles as the authorization check: a request only
    /// resolves for the user it is addressed to.
    pub async fn join_request_for_host(
        &mut self,
        request_id: i64,
        host_id: i64,
    ) -> Result<Option<InviteRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, roomId, fromId, toId FROM request_join_list \
                 WHERE id = ? AND toId = ?",
                vec![json!(request_id), json!(host_id)],
            )
            .await?;
        rows.first().map(|r| InviteRow::from_row(r)).transpose()
    }

    pub async fn remove_join_request(&mut self, request_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM request_join_list WHERE id = ?",
            vec![json!(request_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_join_requests_from(&mut self, user_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM request_join_list WHERE fromId = ?",
            vec![json!(user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_join_requests_to(&mut self, user_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM request_join_list WHERE toId = ?",
            vec![json!(user_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn list_join_requests_for(
        &mut self,
        host_id: i64,
    ) -> Result<Vec<RequestListing>, DbError> {
        let rows = self
            .request(
                "SELECT R.id, R.roomId, R.fromId, U.name \
                 FROM request_join_list AS R JOIN User AS U ON R.fromId = U.id \
                 WHERE R.toId = ?",
                vec![json!(host_id)],
            )
            .await?;
        rows.iter()
            .map(|r| {
                Ok(RequestListing {
                    request_id: col_i64(r, 0)?,
                    room_id: col_i64(r, 1)?,
                    from_id: col_i64(r, 2)?,
                    from_name: col_str(r, 3)?,
                })
            })
            .collect()
    }

    // --- games ---

    pub async fn game_by_name(&mut self, name: &str) -> Result<Option<GameRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, description, OwnerId, LatestVersion FROM Game \
                 WHERE name = ? LIMIT 1",
                vec![json!(name)],
            )
            .await?;
        rows.first().map(|r| GameRow::from_row(r)).transpose()
    }

    pub async fn game_by_id(&mut self, game_id: i64) -> Result<Option<GameRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, description, OwnerId, LatestVersion FROM Game \
                 WHERE id = ? LIMIT 1",
                vec![json!(game_id)],
            )
            .await?;
        rows.first().map(|r| GameRow::from_row(r)).transpose()
    }

    pub async fn list_games(&mut self) -> Result<Vec<(i64, String)>, DbError> {
        let rows = self.request("SELECT id, name FROM Game", vec![]).await?;
        rows.iter()
            .map(|r| Ok((col_i64(r, 0)?, col_str(r, 1)?)))
            .collect()
    }

    pub async fn games_by_owner(&mut self, owner_id: i64) -> Result<Vec<GameRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, name, description, OwnerId, LatestVersion FROM Game \
                 WHERE OwnerId = ?",
                vec![json!(owner_id)],
            )
            .await?;
        rows.iter().map(|r| GameRow::from_row(r)).collect()
    }

    pub async fn insert_game(
        &mut self,
        name: &str,
        description: &str,
        owner_id: i64,
        latest_version: &str,
    ) -> Result<i64, DbError> {
        self.returned_id(
            "INSERT INTO Game (name, description, OwnerId, LatestVersion) \
             VALUES (?, ?, ?, ?) RETURNING id",
            vec![json!(name), json!(description), json!(owner_id), json!(latest_version)],
        )
        .await
    }

    pub async fn set_latest_version(
        &mut self,
        game_id: i64,
        latest_version: &str,
    ) -> Result<(), DbError> {
        self.request(
            "UPDATE Game SET LatestVersion = ? WHERE id = ?",
            vec![json!(latest_version), json!(game_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn delete_game(&mut self, game_id: i64) -> Result<(), DbError> {
        self.request("DELETE FROM Game WHERE id = ?", vec![json!(game_id)])
            .await?;
        Ok(())
    }

    // --- game versions ---

    pub async fn insert_game_version(
        &mut self,
        game_id: i64,
        version: &str,
        command: &str,
    ) -> Result<(), DbError> {
        self.request(
            "INSERT INTO GameVersion (gameId, VersionNumber, Command) VALUES (?, ?, ?)",
            vec![json!(game_id), json!(version), json!(command)],
        )
        .await?;
        Ok(())
    }

    pub async fn version_of(
        &mut self,
        game_id: i64,
        version: &str,
    ) -> Result<Option<VersionRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, gameId, VersionNumber, Command, UploadDate FROM GameVersion \
                 WHERE gameId = ? AND VersionNumber = ? LIMIT 1",
                vec![json!(game_id), json!(version)],
            )
            .await?;
        rows.first().map(|r| VersionRow::from_row(r)).transpose()
    }

    /// Versions ordered newest first; index 0 is the promotion candidate.
    pub async fn versions_newest_first(
        &mut self,
        game_id: i64,
    ) -> Result<Vec<VersionRow>, DbError> {
        let rows = self
            .request(
                "SELECT id, gameId, VersionNumber, Command, UploadDate FROM GameVersion \
                 WHERE gameId = ? ORDER BY UploadDate DESC, id DESC",
                vec![json!(game_id)],
            )
            .await?;
        rows.iter().map(|r| VersionRow::from_row(r)).collect()
    }

    pub async fn version_strings(&mut self, game_id: i64) -> Result<Vec<String>, DbError> {
        let rows = self
            .request(
                "SELECT VersionNumber FROM GameVersion WHERE gameId = ?",
                vec![json!(game_id)],
            )
            .await?;
        rows.iter().map(|r| col_str(r, 0)).collect()
    }

    pub async fn delete_version(&mut self, version_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM GameVersion WHERE id = ?",
            vec![json!(version_id)],
        )
        .await?;
        Ok(())
    }

    pub async fn delete_versions_of(&mut self, game_id: i64) -> Result<(), DbError> {
        self.request(
            "DELETE FROM GameVersion WHERE gameId = ?",
            vec![json!(game_id)],
        )
        .await?;
        Ok(())
    }

    // --- comments ---

    pub async fn insert_comment(
        &mut self,
        game_id: i64,
        user_id: i64,
        content: &str,
        score: i64,
    ) -> Result<(), DbError> {
        self.request(
            "INSERT INTO comment (gameId, userId, content, score) VALUES (?, ?, ?, ?)",
            vec![json!(game_id), json!(user_id), json!(content), json!(score)],
        )
        .await?;
        Ok(())
    }

    pub async fn comments_for(&mut self, game_id: i64) -> Result<Vec<CommentListing>, DbError> {
        let rows = self
            .request(
                "SELECT C.id, U.name, C.content, C.score, C.timestamp \
                 FROM comment C JOIN User U ON C.userId = U.id \
                 WHERE C.gameId = ? ORDER BY C.timestamp DESC",
                vec![json!(game_id)],
            )
            .await?;
        rows.iter()
            .map(|r| {
                Ok(CommentListing {
                    id: col_i64(r, 0)?,
                    user: col_str(r, 1)?,
                    content: col_str(r, 2)?,
                    score: col_i64(r, 3)?,
                    timestamp: col_str(r, 4)?,
                })
            })
            .collect()
    }

    pub async fn average_score(&mut self, game_id: i64) -> Result<Option<f64>, DbError> {
        let rows = self
            .request(
                "SELECT AVG(score) FROM comment WHERE gameId = ?",
                vec![json!(game_id)],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.first()).and_then(Value::as_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_row_decodes_a_positional_tuple() {
        let row = vec![json!(3), json!("alice"), json!("H"), json!("online"), json!("player")];
        let user = UserRow::from_row(&row).expect("decode should succeed");
        assert_eq!(user.id, 3);
        assert_eq!(user.name, "alice");
        assert_eq!(user.role, "player");
    }

    #[test]
    fn short_row_is_a_protocol_error() {
        let row = vec![json!(3), json!("alice")];
        let err = UserRow::from_row(&row).expect_err("short row should fail");
        assert!(matches!(err, DbError::Protocol(_)));
    }

    #[test]
    fn null_description_decodes_as_empty_string() {
        let row = vec![json!(1), json!("mine"), Value::Null, json!(2), json!("0.0.1")];
        let game = GameRow::from_row(&row).expect("decode should succeed");
        assert_eq!(game.description, "");
        assert_eq!(game.latest_version, "0.0.1");
    }
}
