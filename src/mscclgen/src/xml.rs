//! Rendering of a resolved program as its interchange document: a small
//! element tree plus a pretty printer (two-space indent, self-closing
//! leaves, no XML declaration).

use std::borrow::Cow;
use std::fmt;

use crate::gpu::Gpu;
use crate::program::Program;
use crate::step::Step;
use crate::threadblock::ThreadBlock;

pub struct Element {
    tag: &'static str,
    attrs: Vec<(&'static str, String)>,
    children: Vec<Element>,
}

impl Element {
    pub fn new(tag: &'static str) -> Self {
        Element {
            tag,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn set<T: fmt::Display>(&mut self, name: &'static str, value: T) {
        self.attrs.push((name, value.to_string()));
    }

    pub fn child(&mut self, element: Element) {
        self.children.push(element);
    }

    fn write_at(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        write!(f, "{}<{}", pad, self.tag)?;
        for (name, value) in &self.attrs {
            write!(f, " {}=\"{}\"", name, escape(value))?;
        }
        if self.children.is_empty() {
            writeln!(f, "/>")
        } else {
            writeln!(f, ">")?;
            for child in &self.children {
                child.write_at(f, depth + 1)?;
            }
            writeln!(f, "{}</{}>", pad, self.tag)
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_at(f, 0)
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    if value.contains(['&', '<', '>', '"']) {
        let mut escaped = String::with_capacity(value.len() + 8);
        for c in value.chars() {
            match c {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                _ => escaped.push(c),
            }
        }
        Cow::Owned(escaped)
    } else {
        Cow::Borrowed(value)
    }
}

fn signed(value: Option<usize>) -> i64 {
    value.map(|v| v as i64).unwrap_or(-1)
}

pub fn render(program: &Program) -> Element {
    let meta = program.meta();
    let mut algo = Element::new("algo");
    algo.set("name", &meta.name);
    algo.set("proto", &meta.proto);
    algo.set("nchannels", meta.nchannels);
    algo.set("nchunksperloop", meta.nchunksperloop);
    algo.set("ngpus", meta.ngpus);
    algo.set("coll", &meta.coll);
    algo.set("inplace", meta.inplace);
    algo.set("outofplace", meta.outofplace);
    algo.set("minBytes", meta.min_bytes);
    algo.set("maxBytes", meta.max_bytes);
    for gpu in program.gpus() {
        algo.child(render_gpu(gpu));
    }
    algo
}

fn render_gpu(gpu: &Gpu) -> Element {
    let mut element = Element::new("gpu");
    element.set("id", gpu.rank());
    let [input, output, scratch] = gpu.buffer_depths();
    element.set("i_chunks", input);
    element.set("o_chunks", output);
    element.set("s_chunks", scratch);
    for tb in gpu.tbs() {
        element.child(render_tb(gpu, tb));
    }
    element
}

fn render_tb(gpu: &Gpu, tb: &ThreadBlock) -> Element {
    let mut element = Element::new("tb");
    element.set("id", tb.id());
    element.set("send", signed(tb.send()));
    element.set("recv", signed(tb.recv()));
    element.set("chan", tb.chan());
    for id in tb.steps() {
        if let Some(step) = gpu.step(*id) {
            element.child(render_step(step));
        }
    }
    element
}

fn render_step(step: &Step) -> Element {
    let mut element = Element::new("step");
    element.set("s", step.position());
    element.set("type", step.kind());
    element.set("srcbuf", step.src().buf);
    element.set("srcoff", signed(step.src().offset));
    element.set("dstbuf", step.dst().buf);
    element.set("dstoff", signed(step.dst().offset));
    element.set("cnt", step.count());
    element.set("depid", step.pred().map(|p| p.tb as i64).unwrap_or(-1));
    element.set("deps", step.pred().map(|p| p.s as i64).unwrap_or(-1));
    element.set("hasdep", u8::from(step.has_dep()));
    element
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::config::ProgramConfig;
    use crate::step::BufferKind;
    use crate::threadblock::ChannelId;

    #[test]
    fn attribute_values_are_escaped() {
        let mut element = Element::new("algo");
        element.set("name", "a<b>&\"c\"");
        assert_eq!(
            element.to_string(),
            "<algo name=\"a&lt;b&gt;&amp;&quot;c&quot;\"/>\n"
        );
    }

    #[test]
    fn renders_resolved_program() {
        let mut config = ProgramConfig::new("unit");
        config.ngpus = 1;
        config.nchunksperloop = 1;
        let mut program = Program::new(config);
        program
            .chunks()
            .copy(
                Chunk::new(0, BufferKind::Input, 0, 1),
                Chunk::new(0, BufferKind::Output, 0, 1),
                ChannelId(0),
                &[],
            )
            .unwrap();
        program.resolve(Default::default()).unwrap();

        let expected = "\
<algo name=\"unit\" proto=\"Simple\" nchannels=\"1\" nchunksperloop=\"1\" ngpus=\"1\" coll=\"allgather\" inplace=\"1\" outofplace=\"1\" minBytes=\"0\" maxBytes=\"0\">
  <gpu id=\"0\" i_chunks=\"1\" o_chunks=\"1\" s_chunks=\"0\">
    <tb id=\"0\" send=\"-1\" recv=\"-1\" chan=\"0\">
      <step s=\"0\" type=\"cpy\" srcbuf=\"i\" srcoff=\"0\" dstbuf=\"o\" dstoff=\"0\" cnt=\"1\" depid=\"-1\" deps=\"-1\" hasdep=\"0\"/>
    </tb>
  </gpu>
</algo>
";
        assert_eq!(program.to_xml().to_string(), expected);
    }

    #[test]
    fn save_xml_writes_document() {
        let mut config = ProgramConfig::new("disk");
        config.ngpus = 1;
        let program = Program::new(config);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.xml");
        program.save_xml(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("<algo name=\"disk\""));
        assert!(content.ends_with("</algo>\n"));
    }
}
