use std::sync::atomic::{AtomicBool, Ordering};

use figment::{
    providers::{Format as _, Yaml},
    Figment,
};
use trace_obfuscation::{load_obfuscator, tags, ObfuscationConfig, Obfuscator, Span};

const AGENT_CONFIG: &str = r#"
apm_config:
  obfuscation:
    elasticsearch:
      enabled: true
      keep_values: ["size", "from"]
      transformer_type: obfuscate_sql
      transform_values: ["script"]
    mongodb:
      enabled: true
      keep_values: ["find", "limit"]
    sql:
      table_names: true
    redis:
      enabled: true
      commands:
        MYSECRET:
          rule: arg
          index: 0
    memcached:
      enabled: true
      keep_command: true
"#;

fn agent_obfuscator() -> Obfuscator {
    load_obfuscator(&Figment::from(Yaml::string(AGENT_CONFIG))).unwrap()
}

#[test]
fn dispatches_by_span_type() {
    let obfuscator = agent_obfuscator();

    let mut sql = Span::new("sql", "SELECT * FROM users WHERE id IN (1, 2, 3) AND name = 'bob'");
    obfuscator.obfuscate(&mut sql);
    assert_eq!(sql.resource(), "SELECT * FROM users WHERE id IN ( ? ) AND name = ?");
    assert_eq!(sql.meta()[tags::SQL_TABLES], "users");

    let mut redis = Span::new("redis", "MYSECRET token\nSET k v")
        .with_tag(tags::REDIS_RAW_COMMAND, "MYSECRET token\nSET k v");
    obfuscator.obfuscate(&mut redis);
    assert_eq!(redis.resource(), "MYSECRET SET");
    assert_eq!(redis.meta()[tags::REDIS_RAW_COMMAND], "MYSECRET ?\nSET k ?");

    let mut memcached = Span::new("memcached", "set").with_tag(tags::MEMCACHED_COMMAND, "set key 0 0 6\r\nsecret");
    obfuscator.obfuscate(&mut memcached);
    assert_eq!(memcached.meta()[tags::MEMCACHED_COMMAND], "set key 0 0 6");

    let mut web = Span::new("web", "GET /orders/1234?card=4111").with_tag(tags::HTTP_URL, "/orders/1234?card=4111");
    obfuscator.obfuscate(&mut web);
    assert_eq!(web.resource(), "GET /orders/?");
    assert_eq!(web.meta()[tags::HTTP_URL], "/orders/?");

    let mut mongo = Span::new("mongodb", "find")
        .with_tag(tags::MONGODB_QUERY, r#"{"find":"users","filter":{"email":"a@b.c"},"limit":5}"#);
    obfuscator.obfuscate(&mut mongo);
    assert_eq!(mongo.meta()[tags::MONGODB_QUERY], r#"{"find":"users","limit":5}"#);

    let mut es = Span::new("elasticsearch", "search").with_tag(
        tags::ELASTIC_BODY,
        r#"{"query":{"script":"doc.price > 10"},"size":10,"user":"bob"}"#,
    );
    obfuscator.obfuscate(&mut es);
    assert_eq!(es.meta()[tags::ELASTIC_BODY], r#"{"query":{"script":"doc.price > ?"},"size":10}"#);
}

#[test]
fn unknown_span_type_is_untouched() {
    let obfuscator = agent_obfuscator();

    for span_type in ["", "custom", "grpc", "SQL"] {
        let mut span = Span::new(span_type, "SELECT * FROM t WHERE id = 5")
            .with_service("svc")
            .with_name("op")
            .with_tag(tags::HTTP_URL, "/users/42?x=1")
            .with_tag(tags::REDIS_RAW_COMMAND, "SET k v");
        let original = span.clone();

        obfuscator.obfuscate(&mut span);
        assert_eq!(span, original, "span of type {:?} was modified", span_type);
    }
}

#[test]
fn disabled_formats_are_untouched() {
    let obfuscator = Obfuscator::new(ObfuscationConfig::default()).unwrap();

    let mut redis = Span::new("redis", "SET").with_tag(tags::REDIS_RAW_COMMAND, "SET key1 secretvalue");
    let original = redis.clone();
    obfuscator.obfuscate(&mut redis);
    assert_eq!(redis, original);

    let mut memcached = Span::new("memcached", "get").with_tag(tags::MEMCACHED_COMMAND, "get key\r\nvalue");
    let original = memcached.clone();
    obfuscator.obfuscate(&mut memcached);
    assert_eq!(memcached, original);

    let mut es = Span::new("elasticsearch", "search").with_tag(tags::ELASTIC_BODY, r#"{"user":"bob"}"#);
    let original = es.clone();
    obfuscator.obfuscate(&mut es);
    assert_eq!(es, original);
}

#[test]
fn malformed_json_leaves_tag_unchanged() {
    let obfuscator = agent_obfuscator();

    for body in [r#"{"size": 10"#, "not json", r#"{"size": 10} trailing"#] {
        let mut span = Span::new("elasticsearch", "search").with_tag(tags::ELASTIC_BODY, body);
        obfuscator.obfuscate(&mut span);
        assert_eq!(span.meta()[tags::ELASTIC_BODY], body);
    }
}

#[test]
fn obfuscation_is_idempotent() {
    let obfuscator = agent_obfuscator();

    let mut span = Span::new("sql", "UPDATE users SET name = 'bob', age = 42 WHERE id = 7");
    obfuscator.obfuscate(&mut span);
    let once = span.clone();
    obfuscator.obfuscate(&mut span);
    assert_eq!(span.resource(), once.resource());
    assert_eq!(span.meta()[tags::SQL_QUERY], once.meta()[tags::SQL_QUERY]);
}

#[test]
fn literal_escape_mode_shared_across_threads() {
    let obfuscator = agent_obfuscator();
    let query = r"SELECT * FROM t WHERE v = 'it\'s'";
    let toggled = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            obfuscator.set_literal_escape_mode(false);
            toggled.store(true, Ordering::Release);
        });

        s.spawn(|| {
            // Either mode may be observed while the writer runs.
            for _ in 0..100 {
                let mut span = Span::new("sql", query);
                obfuscator.obfuscate(&mut span);
                assert!(
                    ["SELECT * FROM t WHERE v = ?", "SELECT * FROM t WHERE v = ? s ?"].contains(&span.resource()),
                    "unexpected resource: {}",
                    span.resource()
                );
            }
        });
    });

    assert!(toggled.load(Ordering::Acquire));
    assert!(!obfuscator.literal_escape_mode());

    let mut span = Span::new("sql", query);
    obfuscator.obfuscate(&mut span);
    assert_eq!(span.resource(), "SELECT * FROM t WHERE v = ? s ?");
}
