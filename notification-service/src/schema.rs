diesel::table! {
    processed_events (id) {
        id -> Uuid,
        event_type -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    payment_links (reservation_id) {
        reservation_id -> Uuid,
        url -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(processed_events, payment_links);
