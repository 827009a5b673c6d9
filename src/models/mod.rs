mod body;
mod data;
mod frame;
mod level;
mod sanitize;

pub(crate) use body::*;
pub(crate) use data::*;
pub(crate) use frame::*;
pub use level::*;
pub(crate) use sanitize::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn data(body: Body) -> Data {
        Data {
            timestamp: 1_592_736_000,
            environment: "production".into(),
            level: Level::Error,
            language: "rust".into(),
            framework: None,
            server: Server {
                host: "web-1".into(),
                root: None,
                branch: None,
                pid: 42,
            },
            notifier: NotifierInfo {
                name: "faultline".into(),
                version: "0.1.0".into(),
            },
            body,
            uuid: None,
            code_version: None,
            project_package_paths: None,
        }
    }

    #[test]
    fn serialization_format() {
        let data = data(Body::Message(MessageBody {
            body: "hello world".into(),
            extra: None,
        }));
        let serialized = serde_json::to_string(&data).unwrap();
        let expected = "{\"timestamp\":1592736000,\"environment\":\"production\",\"level\":\"error\",\"language\":\"rust\",\"server\":{\"host\":\"web-1\",\"pid\":42},\"notifier\":{\"name\":\"faultline\",\"version\":\"0.1.0\"},\"body\":{\"message\":{\"body\":\"hello world\"}}}";
        assert_eq!(expected, serialized);
    }

    #[test]
    fn body_has_exactly_one_key() {
        let trace = Trace {
            frames: vec![Frame::unknown("main")],
            exception: ExceptionInfo {
                class: "Boom".into(),
                message: "it broke".into(),
                description: None,
            },
            extra: None,
        };
        for body in [
            Body::Trace(trace.clone()),
            Body::TraceChain(vec![trace.clone(), trace]),
        ] {
            let value = serde_json::to_value(&body).unwrap();
            assert_eq!(1, value.as_object().unwrap().len());
        }
    }
}
