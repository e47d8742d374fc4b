// File: src/postgres/schema.rs
//
// Table definitions for the PostgreSQL backends

diesel::table! {
    sync_events (id) {
        id -> Uuid,
        document_id -> Text,
        recorded_at -> Timestamptz,
        sequence_num -> Int8,
        server_seq -> Int8,
        operation -> Text,
        diff -> Nullable<Jsonb>,
        vector_clock -> Jsonb,
        client_id -> Text,
        metadata -> Jsonb,
    }
}

diesel::table! {
    sync_snapshots (id) {
        id -> Uuid,
        document_id -> Text,
        state -> Jsonb,
        version -> Int8,
        sequence_num -> Int8,
        server_seq -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sync_state_vectors (id) {
        id -> Uuid,
        client_id -> Text,
        document_id -> Text,
        vector_clock -> Jsonb,
        last_updated -> Timestamptz,
    }
}
