diesel::table! {
    conversations (id) {
        id -> Text,
        user_id -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    messages (id) {
        id -> Integer,
        conversation_id -> Text,
        role -> Text,
        content -> Text,
        created_at -> BigInt,
    }
}
