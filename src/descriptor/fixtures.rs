//! Descriptor sets built in code for unit tests.

use prost::Message;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    ServiceDescriptorProto,
};

fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        json_name: Some(json_name(name)),
        ..Default::default()
    }
}

pub fn repeated(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        label: Some(Label::Repeated as i32),
        ..field(name, number, ty)
    }
}

pub fn typed(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.into()),
        ..field(name, number, ty)
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.into()),
        field: fields,
        ..Default::default()
    }
}

pub fn method(
    name: &str,
    input: &str,
    output: &str,
    client_streaming: bool,
    server_streaming: bool,
) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.into()),
        input_type: Some(input.into()),
        output_type: Some(output.into()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

pub fn file(name: &str, package: &str) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.into()),
        package: Some(package.into()),
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

pub fn greeter_file() -> FileDescriptorProto {
    FileDescriptorProto {
        message_type: vec![
            message("HelloRequest", vec![field("name", 1, Type::String)]),
            message("HelloReply", vec![field("message", 1, Type::String)]),
            message(
                "Chunk",
                vec![field("text", 1, Type::String), field("count", 2, Type::Int32)],
            ),
            message(
                "Summary",
                vec![field("joined", 1, Type::String), field("total", 2, Type::Int32)],
            ),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("Greeter".into()),
            method: vec![
                method("SayHello", ".demo.HelloRequest", ".demo.HelloReply", false, false),
                method("Countdown", ".demo.Chunk", ".demo.Chunk", false, true),
                method("Collect", ".demo.Chunk", ".demo.Summary", true, false),
                method("Chat", ".demo.Chunk", ".demo.Chunk", true, true),
            ],
            ..Default::default()
        }],
        ..file("demo/greeter.proto", "demo")
    }
}

pub fn field_mask_file() -> FileDescriptorProto {
    FileDescriptorProto {
        message_type: vec![message("FieldMask", vec![repeated("paths", 1, Type::String)])],
        ..file("google/protobuf/field_mask.proto", "google.protobuf")
    }
}

pub fn http_body_file() -> FileDescriptorProto {
    FileDescriptorProto {
        message_type: vec![message(
            "HttpBody",
            vec![field("content_type", 1, Type::String), field("data", 2, Type::Bytes)],
        )],
        ..file("google/api/httpbody.proto", "google.api")
    }
}

pub fn profile_file() -> FileDescriptorProto {
    let labels_entry = DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(
            "LabelsEntry",
            vec![field("key", 1, Type::String), field("value", 2, Type::String)],
        )
    };
    let profile = DescriptorProto {
        nested_type: vec![labels_entry],
        ..message(
            "Profile",
            vec![
                field("name", 1, Type::String),
                field("age", 2, Type::Int32),
                field("active", 3, Type::Bool),
                field("score", 4, Type::Double),
                repeated("tags", 5, Type::String),
                field("avatar", 6, Type::Bytes),
                typed("tier", 7, Type::Enum, ".demo.Tier"),
                typed("address", 8, Type::Message, ".demo.Address"),
                field("big", 9, Type::Int64),
                field("small", 10, Type::Uint32),
                field("ratio", 11, Type::Float),
                typed("update_mask", 12, Type::Message, ".google.protobuf.FieldMask"),
                FieldDescriptorProto {
                    label: Some(Label::Repeated as i32),
                    ..typed("labels", 13, Type::Message, ".demo.Profile.LabelsEntry")
                },
            ],
        )
    };

    FileDescriptorProto {
        dependency: vec![
            "google/protobuf/field_mask.proto".into(),
            "google/api/httpbody.proto".into(),
        ],
        message_type: vec![
            message(
                "Address",
                vec![field("city", 1, Type::String), field("zip", 2, Type::String)],
            ),
            profile,
        ],
        enum_type: vec![EnumDescriptorProto {
            name: Some("Tier".into()),
            value: vec![
                EnumValueDescriptorProto {
                    name: Some("TIER_UNSPECIFIED".into()),
                    number: Some(0),
                    ..Default::default()
                },
                EnumValueDescriptorProto {
                    name: Some("TIER_GOLD".into()),
                    number: Some(1),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }],
        service: vec![ServiceDescriptorProto {
            name: Some("Profiles".into()),
            method: vec![
                method("Save", ".demo.Profile", ".demo.Profile", false, false),
                method("Upload", ".google.api.HttpBody", ".google.api.HttpBody", false, false),
            ],
            ..Default::default()
        }],
        ..file("demo/profile.proto", "demo")
    }
}

pub fn greeter_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![greeter_file()],
    }
}

pub fn profile_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![field_mask_file(), http_body_file(), profile_file()],
    }
}

pub fn encode(set: &FileDescriptorSet) -> Vec<u8> {
    set.encode_to_vec()
}

pub fn greeter_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(greeter_set()).unwrap()
}

pub fn profile_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(profile_set()).unwrap()
}

pub fn greeter_schema() -> Vec<u8> {
    serde_json::json!({
        "demo.Greeter/SayHello": [
            {
                "HttpMethod": "POST", "HttpUri": "/v1/greet", "PathParams": [],
                "InName": "HelloRequest", "InPkg": "demo",
                "OutName": "HelloReply", "OutPkg": "demo",
                "IsClientStream": false, "IsServerStream": false
            },
            {
                "HttpMethod": "GET", "HttpUri": "/v1/greet/{name}", "PathParams": ["name"],
                "InName": "HelloRequest", "InPkg": "demo",
                "OutName": "HelloReply", "OutPkg": "demo",
                "IsClientStream": false, "IsServerStream": false
            }
        ],
        "demo.Greeter/Countdown": [{
            "HttpMethod": "GET", "HttpUri": "/v1/countdown/{count}", "PathParams": ["count"],
            "InName": "Chunk", "InPkg": "demo", "OutName": "Chunk", "OutPkg": "demo",
            "IsClientStream": false, "IsServerStream": true
        }],
        "demo.Greeter/Collect": [{
            "HttpMethod": "POST", "HttpUri": "/v1/collect", "PathParams": null,
            "InName": "Chunk", "InPkg": "demo", "OutName": "Summary", "OutPkg": "demo",
            "IsClientStream": true, "IsServerStream": false
        }],
        "demo.Greeter/Chat": [{
            "HttpMethod": "GET", "HttpUri": "/v1/chat",
            "InName": "Chunk", "InPkg": "demo", "OutName": "Chunk", "OutPkg": "demo",
            "IsClientStream": true, "IsServerStream": true
        }]
    })
    .to_string()
    .into_bytes()
}
