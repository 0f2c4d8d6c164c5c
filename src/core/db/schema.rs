diesel::table! {
    trades (trade_id) {
        trade_id -> Text,
        path -> Text,
        legs -> Integer,
        amount_in -> Text,
        amount_out -> Nullable<Text>,
        profit_loss -> Nullable<Text>,
        profit_loss_pct -> Nullable<Text>,
        status -> Text,
        current_leg -> Integer,
        error_message -> Nullable<Text>,
        held_currency -> Nullable<Text>,
        held_amount -> Nullable<Text>,
        held_value_usd -> Nullable<Text>,
        resolved_at -> Nullable<Text>,
        resolved_amount_usd -> Nullable<Text>,
        resolution_order_id -> Nullable<Text>,
        order_ids -> Text,
        leg_fills -> Text,
        started_at -> Text,
        completed_at -> Nullable<Text>,
        total_execution_ms -> Nullable<BigInt>,
        opportunity_profit_pct -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    health_snapshots (id) {
        id -> Integer,
        total_pairs -> Integer,
        valid_pairs -> Integer,
        valid_pct -> Float,
        skipped_no_book -> BigInt,
        skipped_thin_depth -> BigInt,
        skipped_stale -> BigInt,
        skipped_bad_spread -> BigInt,
        skipped_no_price -> BigInt,
        avg_freshness_ms -> BigInt,
        avg_spread_pct -> Text,
        avg_depth -> Text,
        rejected_opportunities -> BigInt,
        recorded_at -> Text,
    }
}

diesel::table! {
    opportunity_history (id) {
        id -> Integer,
        path -> Text,
        legs -> Integer,
        start_currency -> Text,
        net_profit_pct -> Text,
        is_profitable -> Bool,
        recorded_at -> Text,
    }
}

diesel::table! {
    rejections (id) {
        id -> Integer,
        path -> Text,
        net_profit_pct -> Text,
        class -> Text,
        reason -> Text,
        recorded_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    trades,
    health_snapshots,
    opportunity_history,
    rejections,
);
