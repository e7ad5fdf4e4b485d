// SQLite schema definitions

diesel::table! {
    id_mappings (rc_id, mapping_type) {
        rc_id -> Text,
        mapping_type -> Integer,
        matrix_id -> Text,
        access_token -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    memberships (rc_room_id, rc_user_id) {
        rc_room_id -> Text,
        rc_user_id -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(id_mappings, memberships);
