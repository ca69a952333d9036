//! SQLite-backed [`Store`], built on `diesel-async`'s
//! `SyncConnectionWrapper<SqliteConnection>` pooled with `bb8` — the same
//! pattern the appliance's teacher uses for its own SQLite backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{
    pooled_connection::{bb8, AsyncDieselConnectionManager},
    sync_connection_wrapper::SyncConnectionWrapper,
    AsyncConnection, RunQueryDsl,
};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::*;
use crate::error::{Error, Result};

use super::rows::*;
use super::schema::*;
use super::{
    FileFilter, ModelVersionUpdate, NewAuthorizationCode, NewFile, NewJob, NewOAuthApp, Page,
    PersistedJob, Store,
};

/// Async SQLite connection, per diesel-async's recommended wrapper for
/// backends without native async drivers.
pub type AsyncSqliteConnection = SyncConnectionWrapper<diesel::SqliteConnection>;

pub struct SqliteStore {
    pool: bb8::Pool<AsyncSqliteConnection>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncSqliteConnection>::new(database_url);
        let pool = bb8::Pool::builder()
            .max_size(max_connections)
            .connection_timeout(Duration::from_secs(
                crate::constants::database::DEFAULT_CONNECTION_TIMEOUT_SECS,
            ))
            .build(manager)
            .await
            .map_err(|e| Error::Database(format!("failed to build sqlite pool: {e}")))?;
        Ok(Self { pool })
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, AsyncSqliteConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Database(format!("failed to acquire connection: {e}")))
    }
}

fn paginate(page: i64, page_size: i64) -> (i64, i64) {
    let page = page.max(1);
    let page_size = page_size.clamp(1, crate::constants::database::MAX_PAGE_SIZE);
    (page, page_size)
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_workspace(
        &self,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
        owner_user_id: Uuid,
    ) -> Result<Workspace> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let workspace = Workspace {
            id: new_id(),
            name: name.to_string(),
            description: description.map(str::to_string),
            quota_bytes,
            created_at: now,
            updated_at: now,
        };
        let ws_row = WorkspaceRow::from_domain(&workspace);
        let membership = WorkspaceMembership {
            id: new_id(),
            workspace_id: workspace.id,
            user_id: owner_user_id,
            role: WorkspaceRole::Owner,
            created_at: now,
        };
        let membership_row = WorkspaceMembershipRow::from_domain(&membership);

        conn.transaction::<_, Error, _>(|conn| {
            async move {
                diesel::insert_into(workspaces::table)
                    .values(&ws_row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(workspace_memberships::table)
                    .values(&membership_row)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        Ok(workspace)
    }

    async fn get_workspace(&self, id: Uuid) -> Result<Option<Workspace>> {
        let mut conn = self.conn().await?;
        let row: Option<WorkspaceRow> = workspaces::table
            .filter(workspaces::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(WorkspaceRow::into_domain).transpose()
    }

    async fn update_workspace(
        &self,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let mut conn = self.conn().await?;
        let now = fmt_time(Utc::now());
        if let Some(name) = name {
            diesel::update(workspaces::table.filter(workspaces::id.eq(id.to_string())))
                .set((workspaces::name.eq(name), workspaces::updated_at.eq(&now)))
                .execute(&mut conn)
                .await?;
        }
        if let Some(description) = description {
            diesel::update(workspaces::table.filter(workspaces::id.eq(id.to_string())))
                .set((
                    workspaces::description.eq(description),
                    workspaces::updated_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
        }
        let row: WorkspaceRow = workspaces::table
            .filter(workspaces::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }

    async fn list_workspaces_for_user(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Workspace>> {
        let (page, page_size) = paginate(page, page_size);
        let mut conn = self.conn().await?;
        let ids: Vec<String> = workspace_memberships::table
            .filter(workspace_memberships::user_id.eq(user_id.to_string()))
            .select(workspace_memberships::workspace_id)
            .load(&mut conn)
            .await?;
        let total = ids.len() as i64;
        let rows: Vec<WorkspaceRow> = workspaces::table
            .filter(workspaces::id.eq_any(&ids))
            .order(workspaces::created_at.desc())
            .limit(page_size)
            .offset((page - 1) * page_size)
            .load(&mut conn)
            .await?;
        let items = rows
            .into_iter()
            .map(WorkspaceRow::into_domain)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    async fn workspace_role_for_user(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceRole>> {
        let mut conn = self.conn().await?;
        let role: Option<String> = workspace_memberships::table
            .filter(workspace_memberships::workspace_id.eq(workspace_id.to_string()))
            .filter(workspace_memberships::user_id.eq(user_id.to_string()))
            .select(workspace_memberships::role)
            .first(&mut conn)
            .await
            .optional()?;
        role.map(|r| str_to_workspace_role(&r)).transpose()
    }

    async fn create_workspace_membership(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMembership> {
        let mut conn = self.conn().await?;
        let membership = WorkspaceMembership {
            id: new_id(),
            workspace_id,
            user_id,
            role,
            created_at: Utc::now(),
        };
        let row = WorkspaceMembershipRow::from_domain(&membership);
        diesel::insert_into(workspace_memberships::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(membership)
    }

    async fn delete_workspace_membership(&self, workspace_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        let affected = diesel::delete(
            workspace_memberships::table
                .filter(workspace_memberships::workspace_id.eq(workspace_id.to_string()))
                .filter(workspace_memberships::user_id.eq(user_id.to_string())),
        )
        .execute(&mut conn)
        .await?;
        Ok(affected > 0)
    }

    async fn workspace_usage(&self, workspace_id: Uuid) -> Result<i64> {
        let mut conn = self.conn().await?;
        let project_ids: Vec<String> = projects::table
            .filter(projects::workspace_id.eq(workspace_id.to_string()))
            .select(projects::id)
            .load(&mut conn)
            .await?;
        let total: Option<i64> = files::table
            .filter(files::project_id.eq_any(&project_ids))
            .filter(files::is_deleted.eq(false))
            .select(diesel::dsl::sum(files::size_bytes))
            .first(&mut conn)
            .await?;
        Ok(total.unwrap_or(0))
    }

    async fn create_project(
        &self,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let project = Project {
            id: new_id(),
            workspace_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let row = ProjectRow::from_domain(&project);
        diesel::insert_into(projects::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let mut conn = self.conn().await?;
        let row: Option<ProjectRow> = projects::table
            .filter(projects::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(ProjectRow::into_domain).transpose()
    }

    async fn project_role_for_user(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectRole>> {
        let mut conn = self.conn().await?;
        let role: Option<String> = project_memberships::table
            .filter(project_memberships::project_id.eq(project_id.to_string()))
            .filter(project_memberships::user_id.eq(user_id.to_string()))
            .select(project_memberships::role)
            .first(&mut conn)
            .await
            .optional()?;
        role.map(|r| str_to_project_role(&r)).transpose()
    }

    async fn create_project_membership(
        &self,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<ProjectMembership> {
        let mut conn = self.conn().await?;
        let membership = ProjectMembership {
            id: new_id(),
            project_id,
            user_id,
            role,
            created_at: Utc::now(),
        };
        let row = ProjectMembershipRow::from_domain(&membership);
        diesel::insert_into(project_memberships::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(membership)
    }

    async fn get_or_create_user(
        &self,
        subject: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User> {
        let mut conn = self.conn().await?;
        let existing: Option<UserRow> = users::table
            .filter(users::subject.eq(subject))
            .first(&mut conn)
            .await
            .optional()?;
        if let Some(row) = existing {
            return row.into_domain();
        }
        let user = User {
            id: new_id(),
            subject: subject.to_string(),
            email: email.map(str::to_string),
            display_name: display_name.map(str::to_string),
            created_at: Utc::now(),
        };
        let row = UserRow::from_domain(&user);
        diesel::insert_into(users::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(UserRow::into_domain).transpose()
    }

    async fn create_upload_session(
        &self,
        project_id: Uuid,
        file_name: &str,
        content_type: Option<&str>,
        expected_size_bytes: Option<i64>,
        temp_storage_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UploadSession> {
        let mut conn = self.conn().await?;
        let session = UploadSession {
            id: new_id(),
            project_id,
            file_name: file_name.to_string(),
            content_type: content_type.map(str::to_string),
            expected_size_bytes,
            status: UploadSessionStatus::Reserved,
            temp_storage_key: Some(temp_storage_key.to_string()),
            committed_file_id: None,
            created_at: Utc::now(),
            expires_at,
        };
        let row = UploadSessionRow::from_domain(&session);
        diesel::insert_into(upload_sessions::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(session)
    }

    async fn get_upload_session(&self, id: Uuid) -> Result<Option<UploadSession>> {
        let mut conn = self.conn().await?;
        let row: Option<UploadSessionRow> = upload_sessions::table
            .filter(upload_sessions::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(UploadSessionRow::into_domain).transpose()
    }

    async fn mark_upload_session_uploading(&self, id: Uuid) -> Result<UploadSession> {
        let mut conn = self.conn().await?;
        let affected = diesel::update(
            upload_sessions::table
                .filter(upload_sessions::id.eq(id.to_string()))
                .filter(upload_sessions::status.eq_any(["reserved", "uploading"])),
        )
        .set(upload_sessions::status.eq("uploading"))
        .execute(&mut conn)
        .await?;
        if affected == 0 {
            return Err(Error::Conflict(
                "upload session is not in a state that accepts content".to_string(),
            ));
        }
        let row: UploadSessionRow = upload_sessions::table
            .filter(upload_sessions::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }

    async fn mark_upload_session_failed(&self, id: Uuid) -> Result<UploadSession> {
        let mut conn = self.conn().await?;
        diesel::update(upload_sessions::table.filter(upload_sessions::id.eq(id.to_string())))
            .set(upload_sessions::status.eq("failed"))
            .execute(&mut conn)
            .await?;
        let row: UploadSessionRow = upload_sessions::table
            .filter(upload_sessions::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }

    async fn commit_upload_session(
        &self,
        session_id: Uuid,
        file: NewFile,
    ) -> Result<(UploadSession, File)> {
        let mut conn = self.conn().await?;
        let new_file = File {
            id: new_id(),
            project_id: file.project_id,
            name: file.name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            kind: file.kind,
            category: file.category,
            storage_provider: file.storage_provider,
            storage_key: file.storage_key,
            is_deleted: false,
            bytes_reclaimed: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let file_row = FileRow::from_domain(&new_file);

        conn.transaction::<_, Error, _>(|conn| {
            async move {
                let affected = diesel::update(
                    upload_sessions::table
                        .filter(upload_sessions::id.eq(session_id.to_string()))
                        .filter(upload_sessions::status.eq("uploading")),
                )
                .set((
                    upload_sessions::status.eq("committed"),
                    upload_sessions::committed_file_id.eq(new_file.id.to_string()),
                ))
                .execute(conn)
                .await?;
                if affected == 0 {
                    return Err(Error::Conflict(
                        "upload session lost the commit race".to_string(),
                    ));
                }
                diesel::insert_into(files::table)
                    .values(&file_row)
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await?;

        let session_row: UploadSessionRow = upload_sessions::table
            .filter(upload_sessions::id.eq(session_id.to_string()))
            .first(&mut conn)
            .await?;
        Ok((session_row.into_domain()?, new_file))
    }

    async fn list_expirable_upload_sessions(&self, now: DateTime<Utc>) -> Result<Vec<UploadSession>> {
        let mut conn = self.conn().await?;
        let rows: Vec<UploadSessionRow> = upload_sessions::table
            .filter(upload_sessions::status.eq_any(["reserved", "uploading"]))
            .filter(upload_sessions::expires_at.lt(fmt_time(now)))
            .load(&mut conn)
            .await?;
        rows.into_iter().map(UploadSessionRow::into_domain).collect()
    }

    async fn mark_upload_session_expired(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn().await?;
        let affected = diesel::update(
            upload_sessions::table
                .filter(upload_sessions::id.eq(id.to_string()))
                .filter(upload_sessions::status.eq_any(["reserved", "uploading"])),
        )
        .set(upload_sessions::status.eq("expired"))
        .execute(&mut conn)
        .await?;
        Ok(affected > 0)
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<File>> {
        let mut conn = self.conn().await?;
        let row: Option<FileRow> = files::table
            .filter(files::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(FileRow::into_domain).transpose()
    }

    async fn list_files(
        &self,
        project_id: Uuid,
        filter: FileFilter,
        page: i64,
        page_size: i64,
    ) -> Result<Page<File>> {
        let (page, page_size) = paginate(page, page_size);
        let mut conn = self.conn().await?;

        let mut query = files::table
            .filter(files::project_id.eq(project_id.to_string()))
            .into_boxed();
        if !filter.include_deleted {
            query = query.filter(files::is_deleted.eq(false));
        }
        if let Some(kind) = filter.kind {
            let kind = match kind {
                FileKind::Source => "source",
                FileKind::Artifact => "artifact",
            };
            query = query.filter(files::kind.eq(kind));
        }
        if let Some(category) = filter.category {
            query = query.filter(files::category.eq(category_to_str(category)));
        }

        let rows: Vec<FileRow> = query
            .order(files::created_at.desc())
            .limit(page_size)
            .offset((page - 1) * page_size)
            .load(&mut conn)
            .await?;

        let mut count_query = files::table
            .filter(files::project_id.eq(project_id.to_string()))
            .into_boxed();
        if !filter.include_deleted {
            count_query = count_query.filter(files::is_deleted.eq(false));
        }
        let total: i64 = count_query.count().get_result(&mut conn).await?;

        let items = rows.into_iter().map(FileRow::into_domain).collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    async fn insert_file(&self, file: NewFile) -> Result<File> {
        let mut conn = self.conn().await?;
        let new_file = File {
            id: new_id(),
            project_id: file.project_id,
            name: file.name,
            content_type: file.content_type,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            kind: file.kind,
            category: file.category,
            storage_provider: file.storage_provider,
            storage_key: file.storage_key,
            is_deleted: false,
            bytes_reclaimed: false,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let row = FileRow::from_domain(&new_file);
        diesel::insert_into(files::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(new_file)
    }

    async fn soft_delete_file(&self, id: Uuid) -> Result<File> {
        let mut conn = self.conn().await?;
        let now = fmt_time(Utc::now());
        diesel::update(files::table.filter(files::id.eq(id.to_string())))
            .set((files::is_deleted.eq(true), files::deleted_at.eq(&now)))
            .execute(&mut conn)
            .await?;
        let row: FileRow = files::table
            .filter(files::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }

    async fn create_file_link(
        &self,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink> {
        let mut conn = self.conn().await?;
        let link = FileLink {
            id: new_id(),
            source_file_id,
            target_file_id,
            link_type,
            created_at: Utc::now(),
        };
        let row = FileLinkRow::from_domain(&link);
        diesel::insert_into(file_links::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(link)
    }

    async fn list_links_from(&self, source_file_id: Uuid) -> Result<Vec<FileLink>> {
        let mut conn = self.conn().await?;
        let rows: Vec<FileLinkRow> = file_links::table
            .filter(file_links::source_file_id.eq(source_file_id.to_string()))
            .load(&mut conn)
            .await?;
        rows.into_iter().map(FileLinkRow::into_domain).collect()
    }

    async fn list_links_to(&self, target_file_id: Uuid) -> Result<Vec<FileLink>> {
        let mut conn = self.conn().await?;
        let rows: Vec<FileLinkRow> = file_links::table
            .filter(file_links::target_file_id.eq(target_file_id.to_string()))
            .load(&mut conn)
            .await?;
        rows.into_iter().map(FileLinkRow::into_domain).collect()
    }

    async fn list_unreclaimed_deleted_files(&self, limit: i64) -> Result<Vec<File>> {
        let mut conn = self.conn().await?;
        let rows: Vec<FileRow> = files::table
            .filter(files::is_deleted.eq(true))
            .filter(files::bytes_reclaimed.eq(false))
            .limit(limit)
            .load(&mut conn)
            .await?;
        rows.into_iter().map(FileRow::into_domain).collect()
    }

    async fn mark_file_bytes_reclaimed(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(files::table.filter(files::id.eq(id.to_string())))
            .set(files::bytes_reclaimed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn create_model(
        &self,
        project_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Model> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let model = Model {
            id: new_id(),
            project_id,
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let row = ModelRow::from_domain(&model);
        diesel::insert_into(models::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(model)
    }

    async fn get_model(&self, id: Uuid) -> Result<Option<Model>> {
        let mut conn = self.conn().await?;
        let row: Option<ModelRow> = models::table
            .filter(models::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(ModelRow::into_domain).transpose()
    }

    async fn list_models(&self, project_id: Uuid, page: i64, page_size: i64) -> Result<Page<Model>> {
        let (page, page_size) = paginate(page, page_size);
        let mut conn = self.conn().await?;
        let rows: Vec<ModelRow> = models::table
            .filter(models::project_id.eq(project_id.to_string()))
            .order(models::created_at.desc())
            .limit(page_size)
            .offset((page - 1) * page_size)
            .load(&mut conn)
            .await?;
        let total: i64 = models::table
            .filter(models::project_id.eq(project_id.to_string()))
            .count()
            .get_result(&mut conn)
            .await?;
        let items = rows.into_iter().map(ModelRow::into_domain).collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    async fn create_model_version_with_jobs(
        &self,
        model_id: Uuid,
        version_id: Uuid,
        ifc_file_id: Uuid,
        jobs: Vec<NewJob>,
    ) -> Result<(ModelVersion, Vec<PersistedJob>)> {
        let mut conn = self.conn().await?;

        let now = Utc::now();

        let result = conn
            .transaction::<_, Error, _>(|conn| {
                async move {
                    let max_version: Option<i32> = model_versions::table
                        .filter(model_versions::model_id.eq(model_id.to_string()))
                        .select(diesel::dsl::max(model_versions::version_number))
                        .first(conn)
                        .await?;
                    let version_number = max_version.unwrap_or(0) + 1;

                    let version = ModelVersion {
                        id: version_id,
                        model_id,
                        version_number,
                        ifc_file_id,
                        wex_bim_file_id: None,
                        properties_file_id: None,
                        status: ModelVersionStatus::Pending,
                        error_message: None,
                        created_at: now,
                        processed_at: None,
                    };
                    let version_row = ModelVersionRow::from_domain(&version);
                    diesel::insert_into(model_versions::table)
                        .values(&version_row)
                        .execute(conn)
                        .await?;

                    let mut persisted = Vec::with_capacity(jobs.len());
                    for job in jobs {
                        let job_row = JobRow {
                            id: new_id().to_string(),
                            job_type: job.job_type.clone(),
                            payload: job.payload.clone(),
                            status: "pending".to_string(),
                            attempt: 0,
                            enqueued_at: fmt_time(now),
                            next_attempt_at: fmt_time(now),
                        };
                        diesel::insert_into(super::schema::jobs::table)
                            .values(&job_row)
                            .execute(conn)
                            .await?;
                        persisted.push(PersistedJob {
                            id: parse_id(&job_row.id)?,
                            job_type: job.job_type,
                            payload: job.payload,
                            attempt: 0,
                            enqueued_at: now,
                        });
                    }

                    Ok((version, persisted))
                }
                .scope_boxed()
            })
            .await?;

        Ok(result)
    }

    async fn get_model_version(&self, id: Uuid) -> Result<Option<ModelVersion>> {
        let mut conn = self.conn().await?;
        let row: Option<ModelVersionRow> = model_versions::table
            .filter(model_versions::id.eq(id.to_string()))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(ModelVersionRow::into_domain).transpose()
    }

    async fn list_model_versions(
        &self,
        model_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<ModelVersion>> {
        let (page, page_size) = paginate(page, page_size);
        let mut conn = self.conn().await?;
        let rows: Vec<ModelVersionRow> = model_versions::table
            .filter(model_versions::model_id.eq(model_id.to_string()))
            .order(model_versions::version_number.desc())
            .limit(page_size)
            .offset((page - 1) * page_size)
            .load(&mut conn)
            .await?;
        let total: i64 = model_versions::table
            .filter(model_versions::model_id.eq(model_id.to_string()))
            .count()
            .get_result(&mut conn)
            .await?;
        let items = rows
            .into_iter()
            .map(ModelVersionRow::into_domain)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    async fn update_model_version_guarded(
        &self,
        id: Uuid,
        expected: &[ModelVersionStatus],
        mutate: ModelVersionUpdate,
    ) -> Result<ModelVersion> {
        let mut conn = self.conn().await?;
        let expected_strs: Vec<&'static str> = expected.iter().copied().map(version_status_to_str).collect();

        let status_str = mutate.status.map(version_status_to_str);
        let wex = mutate.wex_bim_file_id.map(|id| id.to_string());
        let props = mutate.properties_file_id.map(|id| id.to_string());
        let processed_at = mutate.processed_at.map(fmt_time);

        let affected = conn
            .transaction::<_, Error, _>(|conn| {
                async move {
                    let current: ModelVersionRow = model_versions::table
                        .filter(model_versions::id.eq(id.to_string()))
                        .first(conn)
                        .await
                        .map_err(|_| Error::NotFound(format!("model version {id}")))?;
                    if !expected_strs.contains(&current.status.as_str()) {
                        return Ok(0);
                    }

                    if let Some(status) = status_str {
                        diesel::update(
                            model_versions::table.filter(model_versions::id.eq(id.to_string())),
                        )
                        .set(model_versions::status.eq(status))
                        .execute(conn)
                        .await?;
                    }
                    if let Some(wex) = &wex {
                        diesel::update(
                            model_versions::table.filter(model_versions::id.eq(id.to_string())),
                        )
                        .set(model_versions::wex_bim_file_id.eq(wex))
                        .execute(conn)
                        .await?;
                    }
                    if let Some(props) = &props {
                        diesel::update(
                            model_versions::table.filter(model_versions::id.eq(id.to_string())),
                        )
                        .set(model_versions::properties_file_id.eq(props))
                        .execute(conn)
                        .await?;
                    }
                    if let Some(msg) = &mutate.error_message {
                        diesel::update(
                            model_versions::table.filter(model_versions::id.eq(id.to_string())),
                        )
                        .set(model_versions::error_message.eq(msg))
                        .execute(conn)
                        .await?;
                    }
                    if let Some(processed_at) = &processed_at {
                        diesel::update(
                            model_versions::table.filter(model_versions::id.eq(id.to_string())),
                        )
                        .set(model_versions::processed_at.eq(processed_at))
                        .execute(conn)
                        .await?;
                    }
                    Ok(1)
                }
                .scope_boxed()
            })
            .await?;

        if affected == 0 {
            return Err(Error::Conflict(format!(
                "model version {id} is not in an expected state for this transition"
            )));
        }

        let row: ModelVersionRow = model_versions::table
            .filter(model_versions::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }

    async fn list_pending_jobs(&self) -> Result<Vec<PersistedJob>> {
        let mut conn = self.conn().await?;
        let rows: Vec<JobRow> = super::schema::jobs::table
            .filter(super::schema::jobs::status.eq("pending"))
            .filter(super::schema::jobs::next_attempt_at.le(fmt_time(Utc::now())))
            .load(&mut conn)
            .await?;
        rows.into_iter()
            .map(|r| {
                Ok(PersistedJob {
                    id: parse_id(&r.id)?,
                    job_type: r.job_type,
                    payload: r.payload,
                    attempt: r.attempt,
                    enqueued_at: parse_time(&r.enqueued_at)?,
                })
            })
            .collect()
    }

    async fn reschedule_job(&self, id: Uuid, attempt: i32, next_attempt_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(super::schema::jobs::table.filter(super::schema::jobs::id.eq(id.to_string())))
            .set((
                super::schema::jobs::attempt.eq(attempt),
                super::schema::jobs::next_attempt_at.eq(fmt_time(next_attempt_at)),
                super::schema::jobs::status.eq("pending"),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::delete(super::schema::jobs::table.filter(super::schema::jobs::id.eq(id.to_string())))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn create_oauth_app(&self, app: NewOAuthApp) -> Result<OAuthApp> {
        let mut conn = self.conn().await?;
        let oauth_app = OAuthApp {
            id: new_id(),
            workspace_id: app.workspace_id,
            client_id: app.client_id,
            client_secret_hash: app.client_secret_hash,
            client_type: app.client_type,
            redirect_uris: app.redirect_uris,
            allowed_scopes: app.allowed_scopes,
            is_enabled: true,
            created_at: Utc::now(),
        };
        let row = OAuthAppRow::from_domain(&oauth_app)?;
        diesel::insert_into(oauth_apps::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(oauth_app)
    }

    async fn get_oauth_app_by_client_id(&self, client_id: &str) -> Result<Option<OAuthApp>> {
        let mut conn = self.conn().await?;
        let row: Option<OAuthAppRow> = oauth_apps::table
            .filter(oauth_apps::client_id.eq(client_id))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(OAuthAppRow::into_domain).transpose()
    }

    async fn list_oauth_apps(&self, workspace_id: Uuid) -> Result<Vec<OAuthApp>> {
        let mut conn = self.conn().await?;
        let rows: Vec<OAuthAppRow> = oauth_apps::table
            .filter(oauth_apps::workspace_id.eq(workspace_id.to_string()))
            .load(&mut conn)
            .await?;
        rows.into_iter().map(OAuthAppRow::into_domain).collect()
    }

    async fn create_authorization_code(&self, code: NewAuthorizationCode) -> Result<AuthorizationCode> {
        let mut conn = self.conn().await?;
        let auth_code = AuthorizationCode {
            id: new_id(),
            code_hash: code.code_hash,
            oauth_app_id: code.oauth_app_id,
            user_id: code.user_id,
            workspace_id: code.workspace_id,
            scopes: code.scopes,
            redirect_uri: code.redirect_uri,
            code_challenge: code.code_challenge,
            code_challenge_method: code.code_challenge_method,
            created_at: Utc::now(),
            expires_at: code.expires_at,
            is_used: false,
            used_at: None,
        };
        let row = AuthorizationCodeRow::from_domain(&auth_code)?;
        diesel::insert_into(authorization_codes::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        Ok(auth_code)
    }

    async fn get_authorization_code_by_hash(&self, code_hash: &str) -> Result<Option<AuthorizationCode>> {
        let mut conn = self.conn().await?;
        let row: Option<AuthorizationCodeRow> = authorization_codes::table
            .filter(authorization_codes::code_hash.eq(code_hash))
            .first(&mut conn)
            .await
            .optional()?;
        row.map(AuthorizationCodeRow::into_domain).transpose()
    }

    async fn consume_authorization_code(&self, id: Uuid) -> Result<AuthorizationCode> {
        let mut conn = self.conn().await?;
        let now = fmt_time(Utc::now());
        let affected = diesel::update(
            authorization_codes::table
                .filter(authorization_codes::id.eq(id.to_string()))
                .filter(authorization_codes::is_used.eq(false)),
        )
        .set((
            authorization_codes::is_used.eq(true),
            authorization_codes::used_at.eq(&now),
        ))
        .execute(&mut conn)
        .await?;
        if affected == 0 {
            return Err(Error::Conflict(
                "authorization code has already been used".to_string(),
            ));
        }
        let row: AuthorizationCodeRow = authorization_codes::table
            .filter(authorization_codes::id.eq(id.to_string()))
            .first(&mut conn)
            .await?;
        row.into_domain()
    }
}
