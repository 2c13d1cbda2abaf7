use crate::{
    db::models::camera_models::{
        Camera, CameraGroup, CameraHealthLog, CameraStatistics, CameraStatus, CameraSummary,
        Location,
    },
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const CAMERA_COLUMNS: &str = "id, name, location_id, camera_type, status, connection_protocol, \
     stream_url, ip_address, port, username, password, resolution, fps, has_night_vision, has_audio, \
     is_active, motion_detection_enabled, recording_enabled, detection_zones, manufacturer, model, \
     last_maintenance, next_maintenance, last_seen, created_at, updated_at";

const GROUP_COLUMNS: &str = "id, name, description, created_at, updated_at";

const HEALTH_COLUMNS: &str = "id, camera_id, status, uptime_percentage, packet_loss, bandwidth_usage, \
     response_time, storage_usage, errors, recorded_at";

const LOCATION_COLUMNS: &str = "id, name, location_type, description, address, floor, room_number, \
     latitude, longitude, institution, is_restricted, security_level, created_at, updated_at";

/// Cameras repository for handling camera and location operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new location
    pub async fn create_location(&self, location: &Location) -> Result<Location> {
        info!("Creating location: {}", location.name);

        let result = sqlx::query_as::<_, Location>(&format!(
            r#"
            INSERT INTO locations (id, name, location_type, description, address, floor, room_number,
                                   latitude, longitude, institution, is_restricted, security_level,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            LOCATION_COLUMNS
        ))
        .bind(location.id)
        .bind(&location.name)
        .bind(&location.location_type)
        .bind(&location.description)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(&location.room_number)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.institution)
        .bind(location.is_restricted)
        .bind(location.security_level)
        .bind(location.created_at)
        .bind(location.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create location: {}", e)))?;

        Ok(result)
    }

    pub async fn get_location(&self, id: &Uuid) -> Result<Option<Location>> {
        let result = sqlx::query_as::<_, Location>(&format!(
            "SELECT {} FROM locations WHERE id = $1",
            LOCATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get location: {}", e)))?;

        Ok(result)
    }

    pub async fn get_all_locations(&self) -> Result<Vec<Location>> {
        let result = sqlx::query_as::<_, Location>(&format!(
            "SELECT {} FROM locations ORDER BY institution, name",
            LOCATION_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list locations: {}", e)))?;

        Ok(result)
    }

    pub async fn update_location(&self, location: &Location) -> Result<Location> {
        let result = sqlx::query_as::<_, Location>(&format!(
            r#"
            UPDATE locations
            SET name = $1, location_type = $2, description = $3, address = $4, floor = $5,
                room_number = $6, latitude = $7, longitude = $8, institution = $9,
                is_restricted = $10, security_level = $11, updated_at = $12
            WHERE id = $13
            RETURNING {}
            "#,
            LOCATION_COLUMNS
        ))
        .bind(&location.name)
        .bind(&location.location_type)
        .bind(&location.description)
        .bind(&location.address)
        .bind(&location.floor)
        .bind(&location.room_number)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.institution)
        .bind(location.is_restricted)
        .bind(location.security_level)
        .bind(Utc::now())
        .bind(location.id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update location: {}", e)))?;

        Ok(result)
    }

    pub async fn delete_location(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM locations WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete location: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Create a new camera
    pub async fn create(&self, camera: &Camera) -> Result<Camera> {
        info!("Creating new camera: {}", camera.name);

        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            INSERT INTO cameras (id, name, location_id, camera_type, status, connection_protocol,
                                 stream_url, ip_address, port, username, password, resolution, fps,
                                 has_night_vision, has_audio, is_active, motion_detection_enabled,
                                 recording_enabled, detection_zones, manufacturer, model,
                                 last_maintenance, next_maintenance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25)
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(camera.id)
        .bind(&camera.name)
        .bind(camera.location_id)
        .bind(&camera.camera_type)
        .bind(camera.status)
        .bind(&camera.connection_protocol)
        .bind(&camera.stream_url)
        .bind(&camera.ip_address)
        .bind(camera.port)
        .bind(&camera.username)
        .bind(&camera.password)
        .bind(&camera.resolution)
        .bind(camera.fps)
        .bind(camera.has_night_vision)
        .bind(camera.has_audio)
        .bind(camera.is_active)
        .bind(camera.motion_detection_enabled)
        .bind(camera.recording_enabled)
        .bind(&camera.detection_zones)
        .bind(&camera.manufacturer)
        .bind(&camera.model)
        .bind(camera.last_maintenance)
        .bind(camera.next_maintenance)
        .bind(camera.created_at)
        .bind(camera.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create camera: {}", e)))?;

        Ok(result)
    }

    /// Get camera by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            "SELECT {} FROM cameras WHERE id = $1",
            CAMERA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result)
    }

    /// Update camera settings (status is changed through `update_status`)
    pub async fn update(&self, camera: &Camera) -> Result<Camera> {
        let result = sqlx::query_as::<_, Camera>(&format!(
            r#"
            UPDATE cameras
            SET name = $1, location_id = $2, camera_type = $3, connection_protocol = $4,
                stream_url = $5, ip_address = $6, port = $7, username = $8, password = $9,
                resolution = $10, fps = $11, has_night_vision = $12, has_audio = $13,
                is_active = $14, motion_detection_enabled = $15, recording_enabled = $16,
                detection_zones = $17, manufacturer = $18, model = $19, last_maintenance = $20,
                next_maintenance = $21, updated_at = $22
            WHERE id = $23
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(&camera.name)
        .bind(camera.location_id)
        .bind(&camera.camera_type)
        .bind(&camera.connection_protocol)
        .bind(&camera.stream_url)
        .bind(&camera.ip_address)
        .bind(camera.port)
        .bind(&camera.username)
        .bind(&camera.password)
        .bind(&camera.resolution)
        .bind(camera.fps)
        .bind(camera.has_night_vision)
        .bind(camera.has_audio)
        .bind(camera.is_active)
        .bind(camera.motion_detection_enabled)
        .bind(camera.recording_enabled)
        .bind(&camera.detection_zones)
        .bind(&camera.manufacturer)
        .bind(&camera.model)
        .bind(camera.last_maintenance)
        .bind(camera.next_maintenance)
        .bind(Utc::now())
        .bind(camera.id)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera: {}", e)))?;

        Ok(result)
    }

    /// Delete camera
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cameras WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete camera: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Cameras with their location names
    pub async fn get_all(&self, status: Option<CameraStatus>) -> Result<Vec<CameraSummary>> {
        let result = sqlx::query_as::<_, CameraSummary>(
            r#"
            SELECT c.id, c.name, c.status, c.location_id, l.name AS location_name, c.is_active, c.last_seen
            FROM cameras c
            JOIN locations l ON l.id = c.location_id
            WHERE ($1::camera_status IS NULL OR c.status = $1)
            ORDER BY l.name, c.name
            "#,
        )
        .bind(status)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all cameras: {}", e)))?;

        Ok(result)
    }

    /// Change the status and return the previous one, or `None` if the camera does not exist
    pub async fn update_status(&self, id: &Uuid, status: CameraStatus) -> Result<Option<CameraStatus>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let previous: Option<CameraStatus> =
            sqlx::query_scalar("SELECT status FROM cameras WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| Error::Database(format!("Failed to read camera status: {}", e)))?;

        if previous.is_some() {
            let seen = if status == CameraStatus::Active {
                Some(Utc::now())
            } else {
                None
            };
            sqlx::query(
                "UPDATE cameras SET status = $1, last_seen = COALESCE($2, last_seen), updated_at = NOW() WHERE id = $3",
            )
            .bind(status)
            .bind(seen)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to update camera status: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit camera status: {}", e)))?;

        Ok(previous)
    }

    /// Number of cameras per status
    pub async fn statistics(&self) -> Result<CameraStatistics> {
        let rows: Vec<(CameraStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM cameras GROUP BY status")
                .fetch_all(&*self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to count cameras: {}", e)))?;

        let mut stats = CameraStatistics::default();
        for (status, count) in rows {
            stats.add(status, count);
        }
        Ok(stats)
    }

    pub async fn create_group(&self, group: &CameraGroup) -> Result<CameraGroup> {
        info!("Creating camera group: {}", group.name);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut result = sqlx::query_as::<_, CameraGroup>(&format!(
            "INSERT INTO camera_groups ({}) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            GROUP_COLUMNS, GROUP_COLUMNS
        ))
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .bind(group.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to create camera group: {}", e)))?;

        Self::replace_members_in(&mut tx, &group.id, &group.camera_ids).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit camera group: {}", e)))?;

        result.camera_ids = group.camera_ids.clone();
        Ok(result)
    }

    pub async fn update_group(&self, group: &CameraGroup) -> Result<CameraGroup> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let mut result = sqlx::query_as::<_, CameraGroup>(&format!(
            "UPDATE camera_groups SET name = $1, description = $2, updated_at = NOW() WHERE id = $3 RETURNING {}",
            GROUP_COLUMNS
        ))
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera group: {}", e)))?;

        Self::replace_members_in(&mut tx, &group.id, &group.camera_ids).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit camera group: {}", e)))?;

        result.camera_ids = group.camera_ids.clone();
        Ok(result)
    }

    async fn replace_members_in(conn: &mut PgConnection, group_id: &Uuid, camera_ids: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM camera_group_members WHERE group_id = $1")
            .bind(group_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to clear camera group: {}", e)))?;

        sqlx::query(
            "INSERT INTO camera_group_members (group_id, camera_id) SELECT $1, UNNEST($2::uuid[]) ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(camera_ids)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to add cameras to group: {}", e)))?;

        Ok(())
    }

    async fn members(&self, group_id: &Uuid) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT camera_id FROM camera_group_members WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera group members: {}", e)))?;

        Ok(ids)
    }

    pub async fn get_group(&self, id: &Uuid) -> Result<Option<CameraGroup>> {
        let result = sqlx::query_as::<_, CameraGroup>(&format!(
            "SELECT {} FROM camera_groups WHERE id = $1",
            GROUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera group: {}", e)))?;

        match result {
            Some(mut group) => {
                group.camera_ids = self.members(&group.id).await?;
                Ok(Some(group))
            }
            None => Ok(None),
        }
    }

    pub async fn get_groups(&self) -> Result<Vec<CameraGroup>> {
        let mut groups = sqlx::query_as::<_, CameraGroup>(&format!(
            "SELECT {} FROM camera_groups ORDER BY name",
            GROUP_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera groups: {}", e)))?;

        for group in groups.iter_mut() {
            group.camera_ids = self.members(&group.id).await?;
        }
        Ok(groups)
    }

    pub async fn delete_group(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM camera_groups WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete camera group: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Members of a group with their location names
    pub async fn group_cameras(&self, group_id: &Uuid) -> Result<Vec<CameraSummary>> {
        let result = sqlx::query_as::<_, CameraSummary>(
            r#"
            SELECT c.id, c.name, c.status, c.location_id, l.name AS location_name, c.is_active, c.last_seen
            FROM camera_group_members m
            JOIN cameras c ON c.id = m.camera_id
            JOIN locations l ON l.id = c.location_id
            WHERE m.group_id = $1
            ORDER BY l.name, c.name
            "#,
        )
        .bind(group_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get group cameras: {}", e)))?;

        Ok(result)
    }

    pub async fn add_health_log(&self, log: &CameraHealthLog) -> Result<CameraHealthLog> {
        let result = sqlx::query_as::<_, CameraHealthLog>(&format!(
            "INSERT INTO camera_health_logs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
            HEALTH_COLUMNS, HEALTH_COLUMNS
        ))
        .bind(log.id)
        .bind(log.camera_id)
        .bind(log.status)
        .bind(log.uptime_percentage)
        .bind(log.packet_loss)
        .bind(log.bandwidth_usage)
        .bind(log.response_time)
        .bind(log.storage_usage)
        .bind(&log.errors)
        .bind(log.recorded_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to record camera health: {}", e)))?;

        Ok(result)
    }

    /// Most recent health measurements first
    pub async fn health_logs(&self, camera_id: &Uuid, limit: i64) -> Result<Vec<CameraHealthLog>> {
        let result = sqlx::query_as::<_, CameraHealthLog>(&format!(
            "SELECT {} FROM camera_health_logs WHERE camera_id = $1 ORDER BY recorded_at DESC LIMIT $2",
            HEALTH_COLUMNS
        ))
        .bind(camera_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera health logs: {}", e)))?;

        Ok(result)
    }
}
