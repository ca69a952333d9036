//! Diesel table definitions matching the relational schema in §3. All ids
//! and foreign keys are stored as their canonical `Uuid` text
//! representation; enums are stored as their lowercase/camelCase string tag.

diesel::table! {
    workspaces (id) {
        id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        quota_bytes -> Nullable<BigInt>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    projects (id) {
        id -> Text,
        workspace_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    users (id) {
        id -> Text,
        subject -> Text,
        email -> Nullable<Text>,
        display_name -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    workspace_memberships (id) {
        id -> Text,
        workspace_id -> Text,
        user_id -> Text,
        role -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    project_memberships (id) {
        id -> Text,
        project_id -> Text,
        user_id -> Text,
        role -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    files (id) {
        id -> Text,
        project_id -> Text,
        name -> Text,
        content_type -> Nullable<Text>,
        size_bytes -> BigInt,
        checksum -> Nullable<Text>,
        kind -> Text,
        category -> Text,
        storage_provider -> Text,
        storage_key -> Text,
        is_deleted -> Bool,
        bytes_reclaimed -> Bool,
        created_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    file_links (id) {
        id -> Text,
        source_file_id -> Text,
        target_file_id -> Text,
        link_type -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    upload_sessions (id) {
        id -> Text,
        project_id -> Text,
        file_name -> Text,
        content_type -> Nullable<Text>,
        expected_size_bytes -> Nullable<BigInt>,
        status -> Text,
        temp_storage_key -> Nullable<Text>,
        committed_file_id -> Nullable<Text>,
        created_at -> Text,
        expires_at -> Text,
    }
}

diesel::table! {
    models (id) {
        id -> Text,
        project_id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    model_versions (id) {
        id -> Text,
        model_id -> Text,
        version_number -> Integer,
        ifc_file_id -> Text,
        wex_bim_file_id -> Nullable<Text>,
        properties_file_id -> Nullable<Text>,
        status -> Text,
        error_message -> Nullable<Text>,
        created_at -> Text,
        processed_at -> Nullable<Text>,
    }
}

diesel::table! {
    oauth_apps (id) {
        id -> Text,
        workspace_id -> Text,
        client_id -> Text,
        client_secret_hash -> Nullable<Text>,
        client_type -> Text,
        redirect_uris -> Text,
        allowed_scopes -> Text,
        is_enabled -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    authorization_codes (id) {
        id -> Text,
        code_hash -> Text,
        oauth_app_id -> Text,
        user_id -> Text,
        workspace_id -> Text,
        scopes -> Text,
        redirect_uri -> Text,
        code_challenge -> Nullable<Text>,
        code_challenge_method -> Nullable<Text>,
        created_at -> Text,
        expires_at -> Text,
        is_used -> Bool,
        used_at -> Nullable<Text>,
    }
}

/// Transactional outbox backing the processing pipeline's at-least-once
/// delivery (§4.5, §9 Open Questions): `CreateModelVersion` inserts rows
/// here in the same transaction as the version insert, so a crash between
/// commit and in-memory enqueue can never lose a job — a recovery sweep
/// re-dispatches anything left `Pending`.
diesel::table! {
    jobs (id) {
        id -> Text,
        job_type -> Text,
        payload -> Text,
        status -> Text,
        attempt -> Integer,
        enqueued_at -> Text,
        next_attempt_at -> Text,
    }
}

diesel::joinable!(projects -> workspaces (workspace_id));
diesel::joinable!(files -> projects (project_id));
diesel::joinable!(upload_sessions -> projects (project_id));
diesel::joinable!(models -> projects (project_id));
diesel::joinable!(model_versions -> models (model_id));
diesel::joinable!(oauth_apps -> workspaces (workspace_id));
diesel::joinable!(workspace_memberships -> workspaces (workspace_id));
diesel::joinable!(workspace_memberships -> users (user_id));
diesel::joinable!(project_memberships -> projects (project_id));
diesel::joinable!(project_memberships -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    workspaces,
    projects,
    users,
    workspace_memberships,
    project_memberships,
    files,
    file_links,
    upload_sessions,
    models,
    model_versions,
    oauth_apps,
    authorization_codes,
    jobs,
);
