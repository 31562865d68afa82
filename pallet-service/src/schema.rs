diesel::table! {
    zones (id) {
        id -> Uuid,
        name -> Varchar,
        center_lat -> Float8,
        center_lon -> Float8,
        radius_km -> Float8,
        kind -> Varchar,
        country_code -> Varchar,
    }
}

diesel::table! {
    producers (id) {
        id -> Uuid,
        name -> Varchar,
        pickup_zone_id -> Nullable<Uuid>,
    }
}

diesel::table! {
    wines (id) {
        id -> Uuid,
        producer_id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    pallets (id) {
        id -> Uuid,
        pickup_zone_id -> Uuid,
        delivery_zone_id -> Uuid,
        bottle_capacity -> Int4,
        status -> Varchar,
        is_complete -> Bool,
        completed_at -> Nullable<Timestamptz>,
        payment_deadline -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        user_id -> Uuid,
        customer_email -> Varchar,
        delivery_address -> Varchar,
        pallet_id -> Nullable<Uuid>,
        pickup_zone_id -> Nullable<Uuid>,
        delivery_zone_id -> Nullable<Uuid>,
        status -> Varchar,
        payment_status -> Varchar,
        payment_deadline -> Nullable<Timestamptz>,
        zone_issue -> Nullable<Varchar>,
        producer_approved_at -> Nullable<Timestamptz>,
        producer_rejected_at -> Nullable<Timestamptz>,
        decided_by_producer_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservation_items (id) {
        id -> Uuid,
        reservation_id -> Uuid,
        wine_id -> Uuid,
        quantity -> Int4,
        decision_status -> Varchar,
        approved_quantity -> Int4,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(wines -> producers (producer_id));
diesel::joinable!(reservation_items -> reservations (reservation_id));

diesel::allow_tables_to_appear_in_same_query!(
    zones,
    producers,
    wines,
    pallets,
    reservations,
    reservation_items,
    outbox_events,
);
